pub mod archiver;
pub mod checkpoint_store;
pub mod in_memory_relay_log;
pub mod object_store;
pub mod redis_stream;
pub mod relay_log_factory;
pub mod workspace;

pub use archiver::ZipArchiver;
pub use checkpoint_store::{FileCheckpointStore, InMemoryCheckpointStore};
pub use in_memory_relay_log::InMemoryRelayLog;
pub use object_store::LocalObjectStore;
pub use redis_stream::RedisRelayLog;
pub use relay_log_factory::RelayLogFactory;
pub use workspace::LocalWorkspaceManager;
