//! Redis Stream追加日志模块
//!
//! 提取引擎通过 XADD 写入发现的嵌入对象，输出中继通过 XREAD 按游标尾随读取。

pub mod connection_manager;
pub mod stream_operations;

pub use connection_manager::RedisConnectionManager;
pub use stream_operations::RedisStreamOperations;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use extractor_core::{
    config::RedisConfig,
    models::{EntryId, RelayEntry, RelayKey},
    traits::RelayLog,
    ExtractorResult,
};

/// 基于Redis Stream的追加日志
pub struct RedisRelayLog {
    connection_manager: Arc<RedisConnectionManager>,
    stream_operations: RedisStreamOperations,
}

impl RedisRelayLog {
    pub async fn new(config: RedisConfig) -> ExtractorResult<Self> {
        let connection_manager = Arc::new(RedisConnectionManager::new(config).await?);
        let stream_operations = RedisStreamOperations::new(connection_manager.clone());
        Ok(Self {
            connection_manager,
            stream_operations,
        })
    }

    pub async fn health_check(&self) -> bool {
        self.connection_manager.health_check().await
    }

    pub async fn len(&self, key: &RelayKey) -> ExtractorResult<u64> {
        self.stream_operations.stream_length(key).await
    }
}

#[async_trait]
impl RelayLog for RedisRelayLog {
    async fn append(
        &self,
        key: &RelayKey,
        path: &str,
        mimetype: &str,
        checksum: &str,
    ) -> ExtractorResult<EntryId> {
        self.stream_operations
            .append(key.as_str(), path, mimetype, checksum)
            .await
    }

    async fn read(
        &self,
        key: &RelayKey,
        after: EntryId,
        count: usize,
        block: Duration,
    ) -> ExtractorResult<Vec<RelayEntry>> {
        self.stream_operations
            .read_after(key.as_str(), after, count, block)
            .await
    }

    async fn delete(&self, key: &RelayKey) -> ExtractorResult<()> {
        self.stream_operations.delete_stream(key.as_str()).await
    }
}
