use serde::{Deserialize, Serialize};

use crate::errors::{ExtractorError, ExtractorResult};
use crate::models::AffinityKey;

/// 工作节点配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 覆盖本机亲和性键，默认使用主机名
    pub affinity_key: Option<String>,
    /// 同时运行的提取会话上限
    pub max_concurrent_sessions: usize,
    /// 外部提取引擎可执行文件
    pub engine_command: String,
    pub engine_args: Vec<String>,
    /// 引擎运行期间上报心跳的间隔
    pub heartbeat_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            affinity_key: None,
            max_concurrent_sessions: 1000,
            engine_command: "rusty-extract".to_string(),
            engine_args: Vec::new(),
            heartbeat_interval_ms: 5_000,
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> ExtractorResult<()> {
        if self.max_concurrent_sessions == 0 {
            return Err(ExtractorError::config_error("最大并发会话数必须大于0"));
        }
        if self.engine_command.trim().is_empty() {
            return Err(ExtractorError::config_error("提取引擎命令不能为空"));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(ExtractorError::config_error("心跳间隔必须大于0"));
        }
        if matches!(&self.affinity_key, Some(key) if key.trim().is_empty()) {
            return Err(ExtractorError::config_error("亲和性键不能为空字符串"));
        }
        Ok(())
    }

    pub fn affinity(&self) -> AffinityKey {
        match &self.affinity_key {
            Some(key) => AffinityKey::new(key.clone()),
            None => AffinityKey::local(),
        }
    }
}
