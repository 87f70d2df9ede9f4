use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use extractor_core::models::{EntryId, RelayEntry, RelayKey};
use extractor_core::traits::RelayLog;
use extractor_core::ExtractorResult;
use tokio::sync::{Notify, RwLock};
use tracing::debug;

/// 内存追加日志实现
///
/// 单进程部署和测试使用。ID 生成规则与 Redis Stream 相同：
/// 毫秒时间戳 + 同毫秒内序号，且保证严格递增。
#[derive(Debug, Default)]
pub struct InMemoryRelayLog {
    streams: RwLock<HashMap<String, Vec<RelayEntry>>>,
    last_id: RwLock<EntryId>,
    appended: Arc<Notify>,
}

impl InMemoryRelayLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self, key: &RelayKey) -> usize {
        self.streams
            .read()
            .await
            .get(key.as_str())
            .map_or(0, |entries| entries.len())
    }

    async fn next_id(&self) -> EntryId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let mut last = self.last_id.write().await;
        let id = if now > last.millis {
            EntryId::new(now, 0)
        } else {
            last.next()
        };
        *last = id;
        id
    }

    async fn entries_after(&self, key: &RelayKey, after: EntryId, count: usize) -> Vec<RelayEntry> {
        let streams = self.streams.read().await;
        streams
            .get(key.as_str())
            .map(|entries| {
                entries
                    .iter()
                    .filter(|entry| entry.id > after)
                    .take(count.max(1))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl RelayLog for InMemoryRelayLog {
    async fn append(
        &self,
        key: &RelayKey,
        path: &str,
        mimetype: &str,
        checksum: &str,
    ) -> ExtractorResult<EntryId> {
        let id = self.next_id().await;
        let entry = RelayEntry {
            id,
            path: path.to_string(),
            mimetype: mimetype.to_string(),
            checksum: checksum.to_string(),
        };
        self.streams
            .write()
            .await
            .entry(key.as_str().to_string())
            .or_default()
            .push(entry);
        self.appended.notify_waiters();
        debug!("追加日志 {} 新增条目 {}", key, id);
        Ok(id)
    }

    async fn read(
        &self,
        key: &RelayKey,
        after: EntryId,
        count: usize,
        block: Duration,
    ) -> ExtractorResult<Vec<RelayEntry>> {
        // 先注册通知再检查，避免漏掉两者之间的追加
        let notified = self.appended.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let entries = self.entries_after(key, after, count).await;
        if !entries.is_empty() || block.is_zero() {
            return Ok(entries);
        }

        let _ = tokio::time::timeout(block, notified).await;
        Ok(self.entries_after(key, after, count).await)
    }

    async fn delete(&self, key: &RelayKey) -> ExtractorResult<()> {
        self.streams.write().await.remove(key.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_append_and_read_in_order() {
        let log = InMemoryRelayLog::new();
        let key = RelayKey::new("run-1-output");

        let a = log.append(&key, "/w/a.txt", "text/plain", "aa").await.unwrap();
        let b = log.append(&key, "/w/b.eml", "message/rfc822", "bb").await.unwrap();
        assert!(a < b);

        let all = log.read(&key, EntryId::START, 10, Duration::ZERO).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].path, "/w/a.txt");

        let rest = log.read(&key, a, 10, Duration::ZERO).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, b);

        let limited = log.read(&key, EntryId::START, 1, Duration::ZERO).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_streams_are_isolated() {
        let log = InMemoryRelayLog::new();
        log.append(&RelayKey::new("a"), "/x", "", "").await.unwrap();
        let other = log
            .read(&RelayKey::new("b"), EntryId::START, 10, Duration::ZERO)
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn test_blocking_read_wakes_on_append() {
        let log = Arc::new(InMemoryRelayLog::new());
        let key = RelayKey::new("run-2-output");

        let reader = {
            let log = log.clone();
            let key = key.clone();
            tokio::spawn(async move {
                log.read(&key, EntryId::START, 10, Duration::from_secs(5)).await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        log.append(&key, "/w/late.pdf", "application/pdf", "cc").await.unwrap();

        let entries = reader.await.unwrap().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, "/w/late.pdf");
    }

    #[tokio::test]
    async fn test_blocking_read_times_out_empty() {
        let log = InMemoryRelayLog::new();
        let entries = log
            .read(&RelayKey::new("idle"), EntryId::START, 10, Duration::from_millis(10))
            .await
            .unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn test_delete_stream() {
        let log = InMemoryRelayLog::new();
        let key = RelayKey::new("gone");
        log.append(&key, "/x", "", "").await.unwrap();
        log.delete(&key).await.unwrap();
        assert_eq!(log.len(&key).await, 0);
    }
}
