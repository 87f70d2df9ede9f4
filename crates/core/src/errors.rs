use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 提取编排错误类型定义
#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("无效的对象定位符: '{locator}'")]
    MalformedLocator { locator: String },

    #[error("无效的MIME类型: {0}")]
    InvalidMimeType(String),

    #[error("工作区错误: {0}")]
    Workspace(String),

    #[error("对象存储错误: {0}")]
    ObjectStore(String),

    #[error("追加日志错误: {0}")]
    RelayLog(String),

    #[error("提取失败: {0}")]
    Extraction(String),

    #[error("打包失败: {0}")]
    Packaging(String),

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("活动 {activity} 心跳超时")]
    HeartbeatTimeout { activity: String },

    #[error("工作节点亲和性不匹配: 需要 {expected}, 当前 {actual}")]
    AffinityViolation { expected: String, actual: String },

    #[error("操作已取消")]
    Cancelled,

    #[error("信号通道已关闭: {0}")]
    ChannelClosed(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误分类，用于重试策略中的不可重试错误列表
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    MalformedLocator,
    InvalidMimeType,
    Workspace,
    ObjectStore,
    RelayLog,
    Extraction,
    Packaging,
    Io,
    Serialization,
    Configuration,
    Timeout,
    HeartbeatTimeout,
    AffinityViolation,
    Cancelled,
    ChannelClosed,
    Internal,
}

pub type ExtractorResult<T> = Result<T, ExtractorError>;

impl ExtractorError {
    pub fn malformed_locator<S: Into<String>>(locator: S) -> Self {
        Self::MalformedLocator {
            locator: locator.into(),
        }
    }
    pub fn workspace<S: Into<String>>(msg: S) -> Self {
        Self::Workspace(msg.into())
    }
    pub fn object_store<S: Into<String>>(msg: S) -> Self {
        Self::ObjectStore(msg.into())
    }
    pub fn relay_log<S: Into<String>>(msg: S) -> Self {
        Self::RelayLog(msg.into())
    }
    pub fn extraction<S: Into<String>>(msg: S) -> Self {
        Self::Extraction(msg.into())
    }
    pub fn config_error<S: Into<String>>(msg: S) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractorError::MalformedLocator { .. } => ErrorKind::MalformedLocator,
            ExtractorError::InvalidMimeType(_) => ErrorKind::InvalidMimeType,
            ExtractorError::Workspace(_) => ErrorKind::Workspace,
            ExtractorError::ObjectStore(_) => ErrorKind::ObjectStore,
            ExtractorError::RelayLog(_) => ErrorKind::RelayLog,
            ExtractorError::Extraction(_) => ErrorKind::Extraction,
            ExtractorError::Packaging(_) => ErrorKind::Packaging,
            ExtractorError::Io(_) => ErrorKind::Io,
            ExtractorError::Serialization(_) => ErrorKind::Serialization,
            ExtractorError::Configuration(_) => ErrorKind::Configuration,
            ExtractorError::Timeout(_) => ErrorKind::Timeout,
            ExtractorError::HeartbeatTimeout { .. } => ErrorKind::HeartbeatTimeout,
            ExtractorError::AffinityViolation { .. } => ErrorKind::AffinityViolation,
            ExtractorError::Cancelled => ErrorKind::Cancelled,
            ExtractorError::ChannelClosed(_) => ErrorKind::ChannelClosed,
            ExtractorError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// 结构性错误重试也不会成功
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ExtractorError::MalformedLocator { .. }
                | ExtractorError::InvalidMimeType(_)
                | ExtractorError::Configuration(_)
                | ExtractorError::AffinityViolation { .. }
                | ExtractorError::Cancelled
        )
    }

    /// 基础设施类错误会终止整个根流水线
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExtractorError::Workspace(_)
                | ExtractorError::Configuration(_)
                | ExtractorError::Internal(_)
        )
    }
}

impl From<serde_json::Error> for ExtractorError {
    fn from(err: serde_json::Error) -> Self {
        ExtractorError::Serialization(err.to_string())
    }
}

impl From<anyhow::Error> for ExtractorError {
    fn from(err: anyhow::Error) -> Self {
        ExtractorError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for ExtractorError {
    fn from(err: config::ConfigError) -> Self {
        ExtractorError::Configuration(err.to_string())
    }
}
