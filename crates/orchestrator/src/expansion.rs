//! 扩展控制器
//!
//! 接收输出中继转发的发现批次，为每个新条目启动一个子提取任务，
//! 子任务的发现继续写入同一个追加日志，因此递归深度不受限制。
//!
//! 状态与驱动分离：[`ExpansionState`] 是纯状态机，只根据事件更新计数和待启动队列；
//! [`ExpansionController`] 负责收取信号、启动子任务以及检查点重启。
//!
//! 完成条件：
//! - 已收到根任务的终止通知
//! - 没有未完成的子任务
//! - 根任务与所有子任务报告的最大追加 ID 都已被中继转发

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use extractor_core::models::{
    target_dir_in, EntryId, ExtractionOutcome, ExtractionTask, OutputKind, RelayEntry, RelayKey,
};
use extractor_core::traits::{CheckpointStore, ExtractionActivity};
use extractor_core::{ExtractorError, ExtractorResult};
use futures::FutureExt;
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::activity::{ActivityExecutor, ActivityOptions};
use crate::history::{restart_from_checkpoint, Checkpointed, HistoryBudget};

/// 扩展控制器处理的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpansionEvent {
    /// 中继转发的一批发现条目
    RelayBatch(Vec<RelayEntry>),
    /// 子任务结束
    TaskCompleted {
        entry_id: EntryId,
        succeeded: bool,
        appended_through: Option<EntryId>,
    },
    /// 根任务已结束，不会再有新的根级发现
    Terminate {
        root_appended_through: Option<EntryId>,
    },
}

/// 子任务的生成参数
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionSettings {
    pub working_dir: PathBuf,
    pub output_kinds: Vec<OutputKind>,
    pub relay_key: RelayKey,
    pub deduplicate: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionReport {
    pub discovered: u64,
    pub launched: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// 缺少路径、无法生成任务的条目
    pub rejected: u64,
    pub duplicates_skipped: u64,
    /// 路径已处理过的条目，来自恢复后重新运行的子任务的重复写入
    #[serde(default)]
    pub redelivered: u64,
    pub restarts: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpansionCheckpoint {
    pub settings: ExpansionSettings,
    pub report: ExpansionReport,
    pub high_water: EntryId,
    pub announced_through: EntryId,
    pub terminated: bool,
    pub outstanding: Vec<(EntryId, ExtractionTask)>,
    /// 已发现但尚未启动的条目
    pub unlaunched: Vec<EntryId>,
    pub seen_checksums: Vec<String>,
    #[serde(default)]
    pub seen_paths: Vec<String>,
}

/// 扩展控制器状态
#[derive(Debug, Clone)]
pub struct ExpansionState {
    settings: ExpansionSettings,
    report: ExpansionReport,
    outstanding: BTreeMap<EntryId, ExtractionTask>,
    unlaunched: VecDeque<EntryId>,
    seen_checksums: BTreeSet<String>,
    seen_paths: BTreeSet<String>,
    high_water: EntryId,
    announced_through: EntryId,
    terminated: bool,
}

impl ExpansionState {
    pub fn new(settings: ExpansionSettings) -> Self {
        Self {
            settings,
            report: ExpansionReport::default(),
            outstanding: BTreeMap::new(),
            unlaunched: VecDeque::new(),
            seen_checksums: BTreeSet::new(),
            seen_paths: BTreeSet::new(),
            high_water: EntryId::START,
            announced_through: EntryId::START,
            terminated: false,
        }
    }

    /// 从崩溃前的检查点恢复；检查点中未完成的子任务全部重新启动
    pub fn recover(checkpoint: ExpansionCheckpoint) -> Self {
        let mut state = Self::resume(checkpoint);
        let queued: BTreeSet<EntryId> = state.unlaunched.iter().copied().collect();
        let lost: Vec<EntryId> = state
            .outstanding
            .keys()
            .filter(|id| !queued.contains(id))
            .copied()
            .collect();
        // 重新启动的任务在报告中不重复计入 launched
        state.report.launched = state.report.launched.saturating_sub(lost.len() as u64);
        state.unlaunched.extend(lost);
        state
    }

    pub fn apply(&mut self, event: ExpansionEvent) {
        match event {
            ExpansionEvent::RelayBatch(entries) => self.accept_batch(entries),
            ExpansionEvent::TaskCompleted {
                entry_id,
                succeeded,
                appended_through,
            } => {
                if self.outstanding.remove(&entry_id).is_none() {
                    debug!("忽略未知子任务的完成通知: {}", entry_id);
                    return;
                }
                if succeeded {
                    self.report.succeeded += 1;
                } else {
                    self.report.failed += 1;
                }
                self.announce(appended_through);
            }
            ExpansionEvent::Terminate {
                root_appended_through,
            } => {
                self.terminated = true;
                self.announce(root_appended_through);
            }
        }
    }

    fn announce(&mut self, appended_through: Option<EntryId>) {
        if let Some(id) = appended_through {
            self.announced_through = self.announced_through.max(id);
        }
    }

    fn accept_batch(&mut self, mut entries: Vec<RelayEntry>) {
        entries.sort_by_key(|entry| entry.id);
        for entry in entries {
            if entry.id <= self.high_water {
                continue;
            }
            self.high_water = entry.id;
            if !entry.path.is_empty() && !self.seen_paths.insert(entry.path.clone()) {
                self.report.redelivered += 1;
                continue;
            }
            self.report.discovered += 1;

            if entry.path.is_empty() {
                warn!("条目 {} 缺少路径，已跳过", entry.id);
                self.report.rejected += 1;
                continue;
            }

            let by_checksum = self.settings.deduplicate && !entry.checksum.is_empty();
            if by_checksum && !self.seen_checksums.insert(entry.checksum.clone()) {
                self.report.duplicates_skipped += 1;
                continue;
            }

            let dir_name = if by_checksum {
                entry.checksum.clone()
            } else {
                entry.id.to_string()
            };
            let task = ExtractionTask {
                source: PathBuf::from(&entry.path),
                target_dir: target_dir_in(&self.settings.working_dir, &dir_name),
                mimetype: entry.mimetype,
                output_kinds: self.settings.output_kinds.clone(),
                relay_key: Some(self.settings.relay_key.clone()),
            };
            self.outstanding.insert(entry.id, task);
            self.unlaunched.push_back(entry.id);
        }
    }

    /// 取出所有待启动的子任务
    pub fn take_launches(&mut self) -> Vec<(EntryId, ExtractionTask)> {
        let mut launches = Vec::with_capacity(self.unlaunched.len());
        while let Some(id) = self.unlaunched.pop_front() {
            if let Some(task) = self.outstanding.get(&id) {
                launches.push((id, task.clone()));
                self.report.launched += 1;
            }
        }
        launches
    }

    pub fn is_complete(&self) -> bool {
        self.terminated && self.outstanding.is_empty() && self.announced_through <= self.high_water
    }

    pub fn note_restart(&mut self) {
        self.report.restarts += 1;
    }

    pub fn report(&self) -> ExpansionReport {
        self.report
    }

    pub fn outstanding(&self) -> usize {
        self.outstanding.len()
    }

    pub fn high_water(&self) -> EntryId {
        self.high_water
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }
}

impl Checkpointed for ExpansionState {
    type Checkpoint = ExpansionCheckpoint;

    fn capture_checkpoint(&self) -> ExpansionCheckpoint {
        ExpansionCheckpoint {
            settings: self.settings.clone(),
            report: self.report,
            high_water: self.high_water,
            announced_through: self.announced_through,
            terminated: self.terminated,
            outstanding: self
                .outstanding
                .iter()
                .map(|(id, task)| (*id, task.clone()))
                .collect(),
            unlaunched: self.unlaunched.iter().copied().collect(),
            seen_checksums: self.seen_checksums.iter().cloned().collect(),
            seen_paths: self.seen_paths.iter().cloned().collect(),
        }
    }

    fn resume(checkpoint: ExpansionCheckpoint) -> Self {
        Self {
            settings: checkpoint.settings,
            report: checkpoint.report,
            outstanding: checkpoint.outstanding.into_iter().collect(),
            unlaunched: checkpoint.unlaunched.into_iter().collect(),
            seen_checksums: checkpoint.seen_checksums.into_iter().collect(),
            seen_paths: checkpoint.seen_paths.into_iter().collect(),
            high_water: checkpoint.high_water,
            announced_through: checkpoint.announced_through,
            terminated: checkpoint.terminated,
        }
    }
}

/// 向扩展控制器发送信号的句柄
#[derive(Debug, Clone)]
pub struct ExpansionHandle {
    tx: mpsc::UnboundedSender<ExpansionEvent>,
}

impl ExpansionHandle {
    pub fn relay_batch(&self, entries: Vec<RelayEntry>) -> ExtractorResult<()> {
        self.send(ExpansionEvent::RelayBatch(entries))
    }

    pub fn terminate(&self, root_appended_through: Option<EntryId>) -> ExtractorResult<()> {
        self.send(ExpansionEvent::Terminate {
            root_appended_through,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn send(&self, event: ExpansionEvent) -> ExtractorResult<()> {
        self.tx
            .send(event)
            .map_err(|_| ExtractorError::ChannelClosed("扩展控制器已退出".to_string()))
    }
}

pub fn expansion_channel() -> (ExpansionHandle, mpsc::UnboundedReceiver<ExpansionEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ExpansionHandle { tx }, rx)
}

struct TaskDone {
    entry_id: EntryId,
    result: ExtractorResult<ExtractionOutcome>,
}

struct ControllerRun {
    state: ExpansionState,
    history: HistoryBudget,
    tasks: JoinSet<TaskDone>,
    events: mpsc::UnboundedReceiver<ExpansionEvent>,
    events_open: bool,
}

/// 扩展控制器驱动
pub struct ExpansionController {
    instance_id: String,
    activity: Arc<dyn ExtractionActivity>,
    executor: Arc<ActivityExecutor>,
    options: ActivityOptions,
    checkpoints: Arc<dyn CheckpointStore>,
    max_history: usize,
}

impl ExpansionController {
    pub fn new<S: Into<String>>(
        instance_id: S,
        activity: Arc<dyn ExtractionActivity>,
        executor: Arc<ActivityExecutor>,
        options: ActivityOptions,
        checkpoints: Arc<dyn CheckpointStore>,
        max_history: usize,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            activity,
            executor,
            options,
            checkpoints,
            max_history,
        }
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// 运行到完成条件满足为止
    pub async fn run(
        &self,
        state: ExpansionState,
        events: mpsc::UnboundedReceiver<ExpansionEvent>,
    ) -> ExtractorResult<ExpansionReport> {
        info!("扩展控制器 {} 启动", self.instance_id);
        let mut run = ControllerRun {
            state,
            history: HistoryBudget::new(self.max_history),
            tasks: JoinSet::new(),
            events,
            events_open: true,
        };
        self.launch_ready(&mut run);

        while !run.state.is_complete() {
            if run.history.exceeded() {
                self.drain_ready(&mut run)?;
                run.state.note_restart();
                run.state =
                    restart_from_checkpoint(self.checkpoints.as_ref(), &self.instance_id, &run.state)
                        .await?;
                run.history.reset();
                counter!("expansion_restarts_total").increment(1);
                info!(
                    "扩展控制器 {} 已从检查点继续: 未完成子任务 {}",
                    self.instance_id,
                    run.state.outstanding()
                );
                self.launch_ready(&mut run);
                continue;
            }

            if !run.events_open && run.tasks.is_empty() {
                return Err(ExtractorError::ChannelClosed(format!(
                    "扩展控制器 {} 在完成前失去了信号来源",
                    self.instance_id
                )));
            }

            tokio::select! {
                event = run.events.recv(), if run.events_open => match event {
                    Some(event) => self.apply(&mut run, event),
                    None => run.events_open = false,
                },
                Some(joined) = run.tasks.join_next(), if !run.tasks.is_empty() => {
                    let done = joined.map_err(|e| ExtractorError::Internal(format!("子任务被取消: {e}")))?;
                    self.complete(&mut run, done)?;
                }
            }
            self.launch_ready(&mut run);
        }

        if let Err(e) = self.checkpoints.clear(&self.instance_id).await {
            warn!("清理扩展控制器检查点失败: {}", e);
        }
        let report = run.state.report();
        info!(
            "扩展控制器 {} 完成: 发现 {}, 成功 {}, 失败 {}",
            self.instance_id, report.discovered, report.succeeded, report.failed
        );
        Ok(report)
    }

    fn apply(&self, run: &mut ControllerRun, event: ExpansionEvent) {
        let before = run.state.report().discovered;
        run.state.apply(event);
        run.history.record();
        let discovered = run.state.report().discovered - before;
        if discovered > 0 {
            counter!("expansion_discovered_total").increment(discovered);
        }
    }

    fn complete(&self, run: &mut ControllerRun, done: TaskDone) -> ExtractorResult<()> {
        let (succeeded, appended_through) = match done.result {
            Ok(outcome) => (true, outcome.appended_through),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                counter!("expansion_task_failures_total").increment(1);
                warn!("子任务 {} 失败: {}", done.entry_id, e);
                (false, None)
            }
        };
        self.apply(
            run,
            ExpansionEvent::TaskCompleted {
                entry_id: done.entry_id,
                succeeded,
                appended_through,
            },
        );
        Ok(())
    }

    /// 检查点前处理所有已就绪的信号和子任务结果，不等待
    fn drain_ready(&self, run: &mut ControllerRun) -> ExtractorResult<()> {
        loop {
            let mut progressed = false;
            while run.events_open {
                match run.events.try_recv() {
                    Ok(event) => {
                        self.apply(run, event);
                        progressed = true;
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => run.events_open = false,
                }
            }
            while let Some(Some(joined)) = run.tasks.join_next().now_or_never() {
                let done =
                    joined.map_err(|e| ExtractorError::Internal(format!("子任务被取消: {e}")))?;
                self.complete(run, done)?;
                progressed = true;
            }
            if !progressed {
                return Ok(());
            }
        }
    }

    fn launch_ready(&self, run: &mut ControllerRun) {
        for (entry_id, task) in run.state.take_launches() {
            debug!("启动子任务 {}: {}", entry_id, task.source.display());
            self.launch(&mut run.tasks, entry_id, task);
            run.history.record();
            counter!("expansion_tasks_launched_total").increment(1);
        }
    }

    fn launch(&self, tasks: &mut JoinSet<TaskDone>, entry_id: EntryId, task: ExtractionTask) {
        let activity = Arc::clone(&self.activity);
        let executor = Arc::clone(&self.executor);
        let options = self.options.clone();

        tasks.spawn(async move {
            let attempt = executor.execute(&options, |ctx| {
                let activity = Arc::clone(&activity);
                let task = task.clone();
                async move { activity.run(&ctx, &task).await }
            });
            let result = match AssertUnwindSafe(attempt).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(ExtractorError::extraction(format!(
                    "子任务 {entry_id} 异常退出"
                ))),
            };
            TaskDone { entry_id, result }
        });
    }
}
