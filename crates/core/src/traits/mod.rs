pub mod checkpoint;
pub mod extraction;
pub mod relay_log;
pub mod storage;

pub use checkpoint::*;
pub use extraction::*;
pub use relay_log::*;
pub use storage::*;
