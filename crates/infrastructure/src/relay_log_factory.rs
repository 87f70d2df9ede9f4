use std::sync::Arc;

use extractor_core::config::{OrchestratorConfig, RelayLogBackend, RelayLogConfig};
use extractor_core::traits::{CheckpointStore, RelayLog};
use extractor_core::ExtractorResult;
use tracing::{debug, info};

use crate::checkpoint_store::{FileCheckpointStore, InMemoryCheckpointStore};
use crate::in_memory_relay_log::InMemoryRelayLog;
use crate::redis_stream::RedisRelayLog;

pub struct RelayLogFactory;

impl RelayLogFactory {
    pub async fn create(config: &RelayLogConfig) -> ExtractorResult<Arc<dyn RelayLog>> {
        debug!("Creating relay log with backend: {:?}", config.backend);

        match config.backend {
            RelayLogBackend::Memory => {
                info!("Initializing in-memory relay log");
                Ok(Arc::new(InMemoryRelayLog::new()))
            }
            RelayLogBackend::Redis => {
                info!(
                    "Initializing Redis Stream relay log at {}:{}",
                    config.redis.host, config.redis.port
                );
                let log = RedisRelayLog::new(config.redis.clone()).await?;
                Ok(Arc::new(log))
            }
        }
    }

    pub fn create_checkpoint_store(config: &OrchestratorConfig) -> Arc<dyn CheckpointStore> {
        match &config.checkpoint_dir {
            Some(dir) => {
                info!("Persisting checkpoints to {}", dir.display());
                Arc::new(FileCheckpointStore::new(dir.clone()))
            }
            None => Arc::new(InMemoryCheckpointStore::new()),
        }
    }
}
