use async_trait::async_trait;

use crate::errors::ExtractorResult;

/// 检查点存储
///
/// 长生命周期组件在每次检查点重启时保存状态，崩溃后据此恢复。
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, instance_id: &str, checkpoint: serde_json::Value) -> ExtractorResult<()>;

    async fn load(&self, instance_id: &str) -> ExtractorResult<Option<serde_json::Value>>;

    async fn clear(&self, instance_id: &str) -> ExtractorResult<()>;
}
