use std::sync::Arc;

use tokio::sync::watch;

use crate::models::AffinityKey;

/// 活动单次尝试的执行上下文
///
/// 长时间运行的活动应周期性调用 [`ActivityContext::heartbeat`]，
/// 否则执行器会在心跳超时后判定该尝试已停滞。
#[derive(Debug, Clone)]
pub struct ActivityContext {
    activity: String,
    attempt: u32,
    worker: AffinityKey,
    heartbeat: Arc<watch::Sender<u64>>,
}

impl ActivityContext {
    /// 创建上下文，并返回用于监控心跳的接收端
    pub fn new<S: Into<String>>(
        activity: S,
        attempt: u32,
        worker: AffinityKey,
    ) -> (Self, watch::Receiver<u64>) {
        let (tx, rx) = watch::channel(0);
        let ctx = Self {
            activity: activity.into(),
            attempt,
            worker,
            heartbeat: Arc::new(tx),
        };
        (ctx, rx)
    }

    /// 无人监控心跳的上下文
    pub fn detached<S: Into<String>>(activity: S) -> Self {
        Self::new(activity, 1, AffinityKey::local()).0
    }

    pub fn activity(&self) -> &str {
        &self.activity
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn worker(&self) -> &AffinityKey {
        &self.worker
    }

    pub fn heartbeat(&self) {
        self.heartbeat.send_modify(|beats| *beats = beats.wrapping_add(1));
    }

    pub fn heartbeats(&self) -> u64 {
        *self.heartbeat.borrow()
    }
}
