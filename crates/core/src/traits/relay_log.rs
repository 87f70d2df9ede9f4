use std::time::Duration;

use async_trait::async_trait;

use crate::errors::ExtractorResult;
use crate::models::{EntryId, RelayEntry, RelayKey};

/// 追加日志服务
///
/// 单写多读：提取引擎按中继键追加，输出中继按游标消费。
#[async_trait]
pub trait RelayLog: Send + Sync {
    /// 追加一条记录，返回分配的单调递增 ID
    async fn append(
        &self,
        key: &RelayKey,
        path: &str,
        mimetype: &str,
        checksum: &str,
    ) -> ExtractorResult<EntryId>;

    /// 读取 `after` 之后（不含）的条目，按 ID 升序。
    /// 没有新条目时最多阻塞 `block`，然后返回空列表。
    async fn read(
        &self,
        key: &RelayKey,
        after: EntryId,
        count: usize,
        block: Duration,
    ) -> ExtractorResult<Vec<RelayEntry>>;

    /// 删除整个流
    async fn delete(&self, key: &RelayKey) -> ExtractorResult<()>;
}
