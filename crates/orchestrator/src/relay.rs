//! 输出中继
//!
//! 持续尾随追加日志，把游标之后的新条目按顺序转发给扩展控制器。
//! 每个条目只转发一次：游标随转发单调前进，并随检查点一起保存。

use std::sync::Arc;
use std::time::Duration;

use extractor_core::config::OrchestratorConfig;
use extractor_core::models::{EntryId, RelayEntry, RelayKey};
use extractor_core::traits::{CheckpointStore, RelayLog};
use extractor_core::{ExtractorError, ExtractorResult};
use futures::FutureExt;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::activity::{ActivityExecutor, ActivityOptions};
use crate::expansion::ExpansionHandle;
use crate::history::{restart_from_checkpoint, Checkpointed, HistoryBudget};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayReport {
    pub forwarded_entries: u64,
    pub batches: u64,
    /// 最后转发的条目
    pub cursor: EntryId,
    pub restarts: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayCheckpoint {
    pub relay_key: RelayKey,
    pub report: RelayReport,
}

/// 输出中继状态
#[derive(Debug, Clone)]
pub struct RelayState {
    relay_key: RelayKey,
    report: RelayReport,
}

impl RelayState {
    pub fn new(relay_key: RelayKey) -> Self {
        Self {
            relay_key,
            report: RelayReport::default(),
        }
    }

    /// 过滤掉游标及之前的条目，返回需要转发的部分并推进游标
    pub fn accept(&mut self, entries: Vec<RelayEntry>) -> Vec<RelayEntry> {
        let mut batch = Vec::with_capacity(entries.len());
        for entry in entries {
            if entry.id > self.report.cursor {
                self.report.cursor = entry.id;
                batch.push(entry);
            }
        }
        if !batch.is_empty() {
            self.report.batches += 1;
            self.report.forwarded_entries += batch.len() as u64;
        }
        batch
    }

    /// 游标退回到 `id`，之后的条目会再次转发
    ///
    /// 恢复运行时扩展控制器的检查点可能落后于中继，退回后由控制器按条目 ID 去重。
    pub fn rewind_to(&mut self, id: EntryId) {
        self.report.cursor = self.report.cursor.min(id);
    }

    pub fn relay_key(&self) -> &RelayKey {
        &self.relay_key
    }

    pub fn cursor(&self) -> EntryId {
        self.report.cursor
    }

    pub fn note_restart(&mut self) {
        self.report.restarts += 1;
    }

    pub fn report(&self) -> RelayReport {
        self.report
    }
}

impl Checkpointed for RelayState {
    type Checkpoint = RelayCheckpoint;

    fn capture_checkpoint(&self) -> RelayCheckpoint {
        RelayCheckpoint {
            relay_key: self.relay_key.clone(),
            report: self.report,
        }
    }

    fn resume(checkpoint: RelayCheckpoint) -> Self {
        Self {
            relay_key: checkpoint.relay_key,
            report: checkpoint.report,
        }
    }
}

/// 通知输出中继停止的句柄
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: mpsc::UnboundedSender<()>,
}

impl RelayHandle {
    pub fn terminate(&self) -> ExtractorResult<()> {
        self.tx
            .send(())
            .map_err(|_| ExtractorError::ChannelClosed("输出中继已退出".to_string()))
    }
}

pub fn relay_channel() -> (RelayHandle, mpsc::UnboundedReceiver<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (RelayHandle { tx }, rx)
}

/// 尾随查询参数
#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// 读到空结果后的等待时间
    pub poll_interval: Duration,
    /// 单次读取的阻塞时长
    pub block: Duration,
    pub read_count: usize,
}

impl RelaySettings {
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            poll_interval: config.relay_poll_interval(),
            block: config.relay_block(),
            read_count: config.relay_read_count,
        }
    }
}

/// 输出中继驱动
pub struct OutputRelay {
    instance_id: String,
    relay_log: Arc<dyn RelayLog>,
    executor: Arc<ActivityExecutor>,
    options: ActivityOptions,
    settings: RelaySettings,
    checkpoints: Arc<dyn CheckpointStore>,
    max_history: usize,
}

impl OutputRelay {
    pub fn new<S: Into<String>>(
        instance_id: S,
        relay_log: Arc<dyn RelayLog>,
        executor: Arc<ActivityExecutor>,
        options: ActivityOptions,
        settings: RelaySettings,
        checkpoints: Arc<dyn CheckpointStore>,
        max_history: usize,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            relay_log,
            executor,
            options,
            settings,
            checkpoints,
            max_history,
        }
    }

    /// 运行到收到终止通知为止
    ///
    /// 终止时正在进行的尾随查询被取消，已经就绪的结果仍会转发。
    pub async fn run(
        &self,
        state: RelayState,
        target: ExpansionHandle,
        mut terminate: mpsc::UnboundedReceiver<()>,
    ) -> ExtractorResult<RelayReport> {
        info!(
            "输出中继 {} 启动: key={}, cursor={}",
            self.instance_id,
            state.relay_key(),
            state.cursor()
        );
        let mut state = state;
        let mut history = HistoryBudget::new(self.max_history);

        loop {
            if history.exceeded() {
                state.note_restart();
                state =
                    restart_from_checkpoint(self.checkpoints.as_ref(), &self.instance_id, &state)
                        .await?;
                history.reset();
                counter!("relay_restarts_total").increment(1);
                debug!("输出中继 {} 已从检查点继续: cursor={}", self.instance_id, state.cursor());
            }

            let query = self.tail(state.relay_key().clone(), state.cursor());
            tokio::pin!(query);

            let entries = tokio::select! {
                biased;
                _ = terminate.recv() => {
                    if let Some(Ok(entries)) = query.as_mut().now_or_never() {
                        self.forward(&mut state, &target, entries, &mut history);
                    }
                    break;
                }
                result = &mut query => result?,
            };
            self.forward(&mut state, &target, entries, &mut history);
        }

        if let Err(e) = self.checkpoints.clear(&self.instance_id).await {
            warn!("清理输出中继检查点失败: {}", e);
        }
        let report = state.report();
        info!(
            "输出中继 {} 停止: 转发 {} 条, 游标 {}",
            self.instance_id, report.forwarded_entries, report.cursor
        );
        Ok(report)
    }

    fn forward(
        &self,
        state: &mut RelayState,
        target: &ExpansionHandle,
        entries: Vec<RelayEntry>,
        history: &mut HistoryBudget,
    ) {
        let batch = state.accept(entries);
        history.record();
        if batch.is_empty() {
            return;
        }
        counter!("relay_forwarded_entries_total").increment(batch.len() as u64);
        debug!("输出中继 {} 转发 {} 条", self.instance_id, batch.len());
        if let Err(e) = target.relay_batch(batch) {
            warn!("输出中继 {} 无法转发: {}", self.instance_id, e);
        }
    }

    /// 尾随查询活动：读到非空结果才返回，等待期间持续上报心跳
    async fn tail(&self, key: RelayKey, after: EntryId) -> ExtractorResult<Vec<RelayEntry>> {
        let log = &self.relay_log;
        let settings = &self.settings;
        self.executor
            .execute(&self.options, |ctx| {
                let key = key.clone();
                async move {
                    loop {
                        let entries = log
                            .read(&key, after, settings.read_count, settings.block)
                            .await?;
                        if !entries.is_empty() {
                            return Ok(entries);
                        }
                        ctx.heartbeat();
                        tokio::time::sleep(settings.poll_interval).await;
                    }
                }
            })
            .await
    }
}
