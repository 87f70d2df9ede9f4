pub mod engine;
pub mod task_runner;

pub use engine::CommandExtractionEngine;
pub use task_runner::{validate_mimetype, ExtractionTaskRunner};
