//! # Extractor Testing Utils
//!
//! Shared testing utilities for the extraction orchestrator workspace:
//! scripted and in-memory collaborators, test data builders and helpers.
//!
//! ```toml
//! [dev-dependencies]
//! extractor-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

// Re-export commonly used items
pub use builders::*;
pub use helpers::*;
pub use mocks::*;
