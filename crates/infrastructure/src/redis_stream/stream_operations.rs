use std::sync::Arc;
use std::time::Duration;

use extractor_core::models::{EntryId, RelayEntry, RelayKey};
use extractor_core::{ExtractorError, ExtractorResult};
use metrics::counter;
use redis::streams::{StreamId, StreamReadReply};
use tracing::{debug, warn};

use super::connection_manager::RedisConnectionManager;

pub const FIELD_PATH: &str = "path";
pub const FIELD_MIMETYPE: &str = "mimetype";
pub const FIELD_CHECKSUM: &str = "checksum";

/// 空读之间的轮询间隔
pub const READ_POLL_STEP: Duration = Duration::from_millis(100);

/// 追加日志在 Redis Stream 上的命令封装
pub struct RedisStreamOperations {
    connection_manager: Arc<RedisConnectionManager>,
}

impl RedisStreamOperations {
    pub fn new(connection_manager: Arc<RedisConnectionManager>) -> Self {
        Self { connection_manager }
    }

    pub async fn append(
        &self,
        stream_name: &str,
        path: &str,
        mimetype: &str,
        checksum: &str,
    ) -> ExtractorResult<EntryId> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream_name);
        let max_len = self.connection_manager.config().max_stream_length;
        if max_len > 0 {
            cmd.arg("MAXLEN").arg("~").arg(max_len);
        }
        cmd.arg("*")
            .arg(FIELD_PATH)
            .arg(path)
            .arg(FIELD_MIMETYPE)
            .arg(mimetype)
            .arg(FIELD_CHECKSUM)
            .arg(checksum);

        let id: String = self.connection_manager.execute_command(&cmd).await?;
        counter!("redis_relay_entries_appended_total").increment(1);
        id.parse()
    }

    /// 读取 `after` 之后的条目；流中暂无新条目时按 [`READ_POLL_STEP`] 轮询，最多等待 `block`
    ///
    /// 不使用 `XREAD BLOCK`：阻塞命令会受连接的响应超时限制。
    pub async fn read_after(
        &self,
        stream_name: &str,
        after: EntryId,
        count: usize,
        block: Duration,
    ) -> ExtractorResult<Vec<RelayEntry>> {
        let deadline = tokio::time::Instant::now() + block;
        loop {
            let entries = self.xread(stream_name, after, count).await?;
            let now = tokio::time::Instant::now();
            if !entries.is_empty() || now >= deadline {
                debug!(
                    "Read {} entries from {} after {}",
                    entries.len(),
                    stream_name,
                    after
                );
                return Ok(entries);
            }
            tokio::time::sleep(READ_POLL_STEP.min(deadline - now)).await;
        }
    }

    async fn xread(
        &self,
        stream_name: &str,
        after: EntryId,
        count: usize,
    ) -> ExtractorResult<Vec<RelayEntry>> {
        let mut cmd = redis::cmd("XREAD");
        cmd.arg("COUNT")
            .arg(count.max(1))
            .arg("STREAMS")
            .arg(stream_name)
            .arg(after.to_string());

        let reply: Option<StreamReadReply> = self.connection_manager.execute_command(&cmd).await?;

        let Some(reply) = reply else {
            return Ok(Vec::new());
        };

        let mut entries = Vec::new();
        for key in reply.keys {
            for stream_id in key.ids {
                match parse_entry(&stream_id) {
                    Ok(entry) => entries.push(entry),
                    Err(e) => {
                        warn!("Skipping malformed stream entry {}: {}", stream_id.id, e);
                        counter!("redis_relay_malformed_entries_total").increment(1);
                    }
                }
            }
        }
        Ok(entries)
    }

    pub async fn delete_stream(&self, stream_name: &str) -> ExtractorResult<()> {
        let mut cmd = redis::cmd("DEL");
        cmd.arg(stream_name);
        let deleted: i64 = self.connection_manager.execute_command(&cmd).await?;
        debug!("Deleted stream {} ({} keys removed)", stream_name, deleted);
        Ok(())
    }

    pub async fn stream_length(&self, key: &RelayKey) -> ExtractorResult<u64> {
        let mut cmd = redis::cmd("XLEN");
        cmd.arg(key.as_str());
        self.connection_manager.execute_command(&cmd).await
    }
}

fn parse_entry(stream_id: &StreamId) -> ExtractorResult<RelayEntry> {
    let id: EntryId = stream_id.id.parse()?;
    let path: String = stream_id
        .get(FIELD_PATH)
        .ok_or_else(|| ExtractorError::relay_log(format!("entry {id} has no path field")))?;
    Ok(RelayEntry {
        id,
        path,
        mimetype: stream_id.get(FIELD_MIMETYPE).unwrap_or_default(),
        checksum: stream_id.get(FIELD_CHECKSUM).unwrap_or_default(),
    })
}
