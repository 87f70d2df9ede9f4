use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{ExtractorError, ExtractorResult};

/// 编排层配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// 单个长生命周期组件在检查点重启前允许记录的事件数
    pub max_history_length: usize,
    /// 追加日志为空时两次尾随查询之间的间隔
    pub relay_poll_interval_ms: u64,
    /// 单次尾随查询的阻塞时长
    pub relay_block_ms: u64,
    /// 单次尾随查询返回的最大条目数
    pub relay_read_count: usize,
    /// 提取活动单次尝试的超时时间
    pub extraction_timeout_secs: u64,
    /// 下载/上传/打包等活动单次尝试的超时时间
    pub transfer_timeout_secs: u64,
    /// 心跳超时，超过该时间未上报心跳的尝试被视为停滞
    pub heartbeat_timeout_secs: u64,
    /// 按内容校验和去重发现的嵌入对象
    pub deduplicate_by_checksum: bool,
    /// 检查点持久化目录，未设置时保存在内存中
    pub checkpoint_dir: Option<PathBuf>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_history_length: 10_000,
            relay_poll_interval_ms: 500,
            relay_block_ms: 1_000,
            relay_read_count: 100,
            extraction_timeout_secs: 4 * 60 * 60,
            transfer_timeout_secs: 10 * 60,
            heartbeat_timeout_secs: 60,
            deduplicate_by_checksum: false,
            checkpoint_dir: None,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> ExtractorResult<()> {
        if self.max_history_length == 0 {
            return Err(ExtractorError::config_error("历史长度上限必须大于0"));
        }
        if self.relay_read_count == 0 {
            return Err(ExtractorError::config_error("单次读取条目数必须大于0"));
        }
        if self.extraction_timeout_secs == 0 || self.transfer_timeout_secs == 0 {
            return Err(ExtractorError::config_error("活动超时时间必须大于0"));
        }
        if self.heartbeat_timeout_secs == 0 {
            return Err(ExtractorError::config_error("心跳超时时间必须大于0"));
        }
        // 尾随查询两次心跳之间最长间隔一次阻塞读取加一次轮询等待
        if self.relay_block() + self.relay_poll_interval() >= self.heartbeat_timeout() {
            return Err(ExtractorError::config_error(
                "尾随查询阻塞时长与轮询间隔之和必须小于心跳超时时间",
            ));
        }
        Ok(())
    }

    pub fn relay_poll_interval(&self) -> Duration {
        Duration::from_millis(self.relay_poll_interval_ms)
    }

    pub fn relay_block(&self) -> Duration {
        Duration::from_millis(self.relay_block_ms)
    }

    pub fn extraction_timeout(&self) -> Duration {
        Duration::from_secs(self.extraction_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_wait_must_fit_in_heartbeat_timeout() {
        let config = OrchestratorConfig {
            relay_block_ms: 59_999,
            relay_poll_interval_ms: 500,
            heartbeat_timeout_secs: 60,
            ..OrchestratorConfig::default()
        };
        assert!(config.validate().is_err());

        let config = OrchestratorConfig {
            relay_block_ms: 59_999,
            relay_poll_interval_ms: 0,
            heartbeat_timeout_secs: 60,
            ..OrchestratorConfig::default()
        };
        assert!(config.validate().is_ok());

        assert!(OrchestratorConfig::default().validate().is_ok());
    }
}
