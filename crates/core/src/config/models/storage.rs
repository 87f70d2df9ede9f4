use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::{ExtractorError, ExtractorResult};

/// 追加日志后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayLogBackend {
    Memory,
    Redis,
}

/// Redis连接配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub database: i64,
    pub password: Option<String>,
    pub connection_timeout_seconds: u64,
    /// 追加日志条目的最大保留数，0 表示不裁剪
    pub max_stream_length: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            database: 0,
            password: None,
            connection_timeout_seconds: 30,
            max_stream_length: 0,
        }
    }
}

impl RedisConfig {
    /// 构建Redis连接URL
    pub fn build_connection_url(&self) -> String {
        match &self.password {
            Some(password) => format!(
                "redis://:{}@{}:{}/{}",
                password, self.host, self.port, self.database
            ),
            None => format!("redis://{}:{}/{}", self.host, self.port, self.database),
        }
    }
}

/// 追加日志配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayLogConfig {
    pub backend: RelayLogBackend,
    pub redis: RedisConfig,
}

impl Default for RelayLogConfig {
    fn default() -> Self {
        Self {
            backend: RelayLogBackend::Memory,
            redis: RedisConfig::default(),
        }
    }
}

impl RelayLogConfig {
    pub fn validate(&self) -> ExtractorResult<()> {
        if self.backend == RelayLogBackend::Redis {
            if self.redis.host.trim().is_empty() {
                return Err(ExtractorError::config_error("Redis主机地址不能为空"));
            }
            if self.redis.port == 0 {
                return Err(ExtractorError::config_error("Redis端口不能为0"));
            }
            if self.redis.connection_timeout_seconds == 0 {
                return Err(ExtractorError::config_error("Redis连接超时必须大于0"));
            }
        }
        Ok(())
    }
}

/// 对象存储配置，bucket 映射为根目录下的子目录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectStoreConfig {
    pub root_dir: PathBuf,
}

impl Default for ObjectStoreConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("/var/lib/extractor/objects"),
        }
    }
}

impl ObjectStoreConfig {
    pub fn validate(&self) -> ExtractorResult<()> {
        if self.root_dir.as_os_str().is_empty() {
            return Err(ExtractorError::config_error("对象存储根目录不能为空"));
        }
        Ok(())
    }
}

/// 工作区配置
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    /// 所有工作区都创建在该目录下，释放时只允许删除其中的路径
    pub base_dir: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            base_dir: std::env::temp_dir().join("extractor"),
        }
    }
}

impl WorkspaceConfig {
    pub fn validate(&self) -> ExtractorResult<()> {
        if !self.base_dir.is_absolute() {
            return Err(ExtractorError::config_error(format!(
                "工作区根目录必须是绝对路径: {}",
                self.base_dir.display()
            )));
        }
        Ok(())
    }
}
