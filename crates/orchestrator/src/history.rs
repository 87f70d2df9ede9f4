use extractor_core::traits::CheckpointStore;
use extractor_core::ExtractorResult;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

/// 事件历史预算
///
/// 长生命周期组件（扩展控制器、输出中继）每处理一个事件计数一次，
/// 达到上限后保存检查点并以全新的历史继续运行。
#[derive(Debug, Clone)]
pub struct HistoryBudget {
    limit: usize,
    recorded: usize,
}

impl HistoryBudget {
    pub fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            recorded: 0,
        }
    }

    pub fn record(&mut self) {
        self.recorded += 1;
    }

    pub fn recorded(&self) -> usize {
        self.recorded
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn exceeded(&self) -> bool {
        self.recorded >= self.limit
    }

    pub fn reset(&mut self) {
        self.recorded = 0;
    }
}

/// 可以通过检查点重启的状态
///
/// `resume(capture_checkpoint())` 必须得到与原状态行为一致的实例，
/// 重复执行不改变计数。
pub trait Checkpointed: Sized {
    type Checkpoint: Serialize + DeserializeOwned + Clone + Send;

    fn capture_checkpoint(&self) -> Self::Checkpoint;

    fn resume(checkpoint: Self::Checkpoint) -> Self;
}

/// 保存检查点并返回由它恢复出的新状态
pub async fn restart_from_checkpoint<S: Checkpointed>(
    store: &dyn CheckpointStore,
    instance_id: &str,
    state: &S,
) -> ExtractorResult<S> {
    let checkpoint = state.capture_checkpoint();
    store
        .save(instance_id, serde_json::to_value(&checkpoint)?)
        .await?;
    debug!("检查点已保存: {}", instance_id);
    Ok(S::resume(checkpoint))
}

/// 读取崩溃前最后保存的检查点
pub async fn load_checkpoint<C: DeserializeOwned>(
    store: &dyn CheckpointStore,
    instance_id: &str,
) -> ExtractorResult<Option<C>> {
    match store.load(instance_id).await? {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}
