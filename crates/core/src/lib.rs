pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod retry;
pub mod traits;

pub use config::AppConfig;
pub use errors::{ErrorKind, ExtractorError, ExtractorResult};
pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::RetryPolicy;
