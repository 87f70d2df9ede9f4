pub mod app_config;
pub mod orchestrator;
pub mod storage;
pub mod worker;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use orchestrator::OrchestratorConfig;
pub use storage::{ObjectStoreConfig, RedisConfig, RelayLogBackend, RelayLogConfig, WorkspaceConfig};
pub use worker::WorkerConfig;
