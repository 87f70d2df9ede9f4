//! 配置模型与加载
//!
//! 加载顺序：默认值 → TOML 配置文件 → `EXTRACTOR_` 前缀的环境变量。
//! 各组件只接收自己的配置段，不在使用处读取环境变量。

pub mod models;

pub use models::{
    AppConfig, ObjectStoreConfig, OrchestratorConfig, RedisConfig, RelayLogBackend,
    RelayLogConfig, WorkerConfig, WorkspaceConfig,
};
