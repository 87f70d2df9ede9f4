//! 根流水线
//!
//! 一次处理请求的完整生命周期：
//! 1. 在当前节点创建工作区
//! 2. 下载根输入文件
//! 3. 执行根提取；递归时同时运行扩展控制器和输出中继
//! 4. 根提取结束后通知扩展控制器，等待它完成后再停止中继
//! 5. 打包工作目录并上传
//! 6. 无论成功与否都尽力释放工作区
//!
//! 所有读写工作区的活动都固定在创建工作区的节点上执行。
//!
//! 递归运行在根提取完成后保存根检查点。进程中断后用同一个运行标识再次提交，
//! 若根检查点和工作区都还在，则跳过下载和根提取，扩展控制器与输出中继从各自
//! 最后的检查点继续。否则清除残留状态从头开始。运行失败时残留状态同样被清除。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use extractor_core::config::OrchestratorConfig;
use extractor_core::models::{
    AffinityKey, EntryId, ExtractionOutcome, ExtractionTask, ObjectLocator, ProcessRequest,
    RelayKey, Workspace,
};
use extractor_core::traits::{
    Archiver, CheckpointStore, ExtractionActivity, ObjectStore, RelayLog, WorkspaceManager,
};
use extractor_core::{ExtractorError, ExtractorResult, RetryPolicy};
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::activity::{ActivityExecutor, ActivityOptions};
use crate::expansion::{
    expansion_channel, ExpansionCheckpoint, ExpansionController, ExpansionReport,
    ExpansionSettings, ExpansionState,
};
use crate::history::{load_checkpoint, Checkpointed};
use crate::relay::{
    relay_channel, OutputRelay, RelayCheckpoint, RelayReport, RelaySettings, RelayState,
};

/// 根流水线依赖的协作者
#[derive(Clone)]
pub struct PipelineDeps {
    pub workspace_manager: Arc<dyn WorkspaceManager>,
    pub object_store: Arc<dyn ObjectStore>,
    pub extraction: Arc<dyn ExtractionActivity>,
    pub relay_log: Arc<dyn RelayLog>,
    pub archiver: Arc<dyn Archiver>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub executor: Arc<ActivityExecutor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub run_id: String,
    pub input: String,
    pub output_locator: ObjectLocator,
    pub root: ExtractionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expansion: Option<ExpansionReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relay: Option<RelayReport>,
    /// 是否从中断的运行继续
    pub resumed: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// 根提取完成后的进度
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootCheckpoint {
    pub root: ExtractionOutcome,
    /// 根任务及其内联嵌入对象写入日志的最大条目 ID
    pub appended_through: Option<EntryId>,
}

struct RunOutput {
    output_locator: ObjectLocator,
    root: ExtractionOutcome,
    expansion: Option<ExpansionReport>,
    relay: Option<RelayReport>,
}

/// 取消时连同后台任务一起终止
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

async fn join_component<T>(
    handle: &mut AbortOnDrop<ExtractorResult<T>>,
    name: &str,
) -> ExtractorResult<T> {
    match (&mut handle.0).await {
        Ok(result) => result,
        Err(e) => Err(ExtractorError::Internal(format!("{name} 异常退出: {e}"))),
    }
}

/// 子组件在等待它的步骤完成前就结束了
fn exited_early<T>(name: &str, finished: ExtractorResult<T>) -> ExtractorError {
    match finished {
        Err(e) => e,
        Ok(_) => ExtractorError::Internal(format!("{name}提前退出")),
    }
}

fn root_instance(run_id: &str) -> String {
    format!("{run_id}-root")
}

fn expansion_instance(run_id: &str) -> String {
    format!("{run_id}-expansion")
}

fn relay_instance(run_id: &str) -> String {
    format!("{run_id}-relay")
}

pub struct RootPipeline {
    deps: PipelineDeps,
    config: OrchestratorConfig,
    retry: RetryPolicy,
}

impl RootPipeline {
    pub fn new(deps: PipelineDeps, config: OrchestratorConfig, retry: RetryPolicy) -> Self {
        Self {
            deps,
            config,
            retry,
        }
    }

    fn transfer_options(&self, name: &str, affinity: &AffinityKey) -> ActivityOptions {
        ActivityOptions::new(name, self.config.transfer_timeout(), self.retry.clone())
            .pinned_to(affinity)
    }

    fn extraction_options(&self, name: &str, affinity: &AffinityKey) -> ActivityOptions {
        ActivityOptions::new(name, self.config.extraction_timeout(), self.retry.clone())
            .with_heartbeat_timeout(self.config.heartbeat_timeout())
            .pinned_to(affinity)
    }

    #[instrument(skip(self, request), fields(input = %request.input, recurse = request.recurse))]
    pub async fn run(&self, request: &ProcessRequest) -> ExtractorResult<PipelineReport> {
        request.validate_run_id()?;
        let run_id = request
            .run_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let started_at = Utc::now();
        info!("根流水线 {} 启动: {} -> {}", run_id, request.input, request.output);

        let checkpoint = if request.recurse {
            load_checkpoint::<RootCheckpoint>(
                self.deps.checkpoints.as_ref(),
                &root_instance(&run_id),
            )
            .await?
        } else {
            None
        };
        let (workspace, resume) = self.open_workspace(&run_id, request.recurse, checkpoint).await?;
        let resumed = resume.is_some();
        if resumed {
            counter!("pipeline_resumed_total").increment(1);
            info!("根流水线 {} 从根检查点继续", run_id);
        }

        let result = self.run_in_workspace(&run_id, request, &workspace, resume).await;
        if request.recurse && result.is_err() {
            self.discard_run_state(&run_id).await;
        }
        self.release(&workspace).await;

        let finished_at = Utc::now();
        let elapsed = (finished_at - started_at).to_std().unwrap_or_default();
        histogram!("pipeline_duration_seconds").record(elapsed.as_secs_f64());

        match result {
            Ok(output) => {
                counter!("pipeline_success_total").increment(1);
                info!("根流水线 {} 完成: 输出 {}", run_id, output.output_locator);
                Ok(PipelineReport {
                    run_id,
                    input: request.input.clone(),
                    output_locator: output.output_locator,
                    root: output.root,
                    expansion: output.expansion,
                    relay: output.relay,
                    resumed,
                    started_at,
                    finished_at,
                })
            }
            Err(e) => {
                counter!("pipeline_failures_total").increment(1);
                error!("根流水线 {} 失败: {}", run_id, e);
                Err(e)
            }
        }
    }

    /// 有根检查点时重新打开原工作区，否则创建新工作区
    ///
    /// 全新的递归运行先清除同一运行标识的残留检查点和追加日志。
    async fn open_workspace(
        &self,
        run_id: &str,
        recurse: bool,
        checkpoint: Option<RootCheckpoint>,
    ) -> ExtractorResult<(Workspace, Option<RootCheckpoint>)> {
        let executor = &self.deps.executor;
        let worker = executor.worker().clone();

        if let Some(checkpoint) = checkpoint {
            let reopened = executor
                .execute(&self.transfer_options("reopen_workspace", &worker), |_| {
                    self.deps.workspace_manager.reopen(&worker, run_id)
                })
                .await?;
            match reopened {
                Some(workspace) => return Ok((workspace, Some(checkpoint))),
                None => warn!("运行 {} 的工作区已不存在，从头开始", run_id),
            }
        }

        if recurse {
            self.clear_run_state(run_id).await?;
        }
        let workspace = executor
            .execute(&self.transfer_options("acquire_workspace", &worker), |_| {
                self.deps.workspace_manager.acquire(&worker, run_id)
            })
            .await?;
        Ok((workspace, None))
    }

    async fn clear_run_state(&self, run_id: &str) -> ExtractorResult<()> {
        for instance in [
            root_instance(run_id),
            expansion_instance(run_id),
            relay_instance(run_id),
        ] {
            self.deps.checkpoints.clear(&instance).await?;
        }
        self.deps.relay_log.delete(&RelayKey::for_run(run_id)).await
    }

    /// 失败的运行不可继续，尽力清除它的检查点和追加日志
    async fn discard_run_state(&self, run_id: &str) {
        if let Err(e) = self.clear_run_state(run_id).await {
            warn!("清除运行 {} 的残留状态失败: {}", run_id, e);
        }
    }

    async fn run_in_workspace(
        &self,
        run_id: &str,
        request: &ProcessRequest,
        workspace: &Workspace,
        resume: Option<RootCheckpoint>,
    ) -> ExtractorResult<RunOutput> {
        let executor = &self.deps.executor;
        let affinity = &workspace.affinity_key;

        let relay_key = request.recurse.then(|| RelayKey::for_run(run_id));
        let root_task = ExtractionTask {
            source: workspace.root_path.clone(),
            target_dir: workspace.working_dir.clone(),
            mimetype: request.mimetype.clone(),
            output_kinds: request.root_output_kinds(),
            relay_key: relay_key.clone(),
        };

        let (root, expansion, relay) = match relay_key {
            Some(key) => {
                let (root, expansion, relay) = self
                    .extract_recursively(run_id, request, workspace, &root_task, key, resume)
                    .await?;
                (root, Some(expansion), Some(relay))
            }
            None => {
                self.download_input(request, workspace).await?;
                (self.extract_root(&root_task, affinity).await?, None, None)
            }
        };

        let archive_path = workspace.archive_path();
        let archive = executor
            .execute(&self.transfer_options("package_output", affinity), |_| {
                self.deps.archiver.package(&workspace.working_dir, &archive_path)
            })
            .await?;

        let output_locator = executor
            .execute(&self.transfer_options("upload_output", affinity), |_| async {
                let locator = request.output_locator()?;
                self.deps.object_store.upload(&archive, &locator).await
            })
            .await?;

        Ok(RunOutput {
            output_locator,
            root,
            expansion,
            relay,
        })
    }

    async fn download_input(
        &self,
        request: &ProcessRequest,
        workspace: &Workspace,
    ) -> ExtractorResult<()> {
        let bytes = self
            .deps
            .executor
            .execute(
                &self.transfer_options("download_input", &workspace.affinity_key),
                |_| async {
                    let locator = request.input_locator()?;
                    self.deps
                        .object_store
                        .download(&locator, &workspace.root_path)
                        .await
                },
            )
            .await?;
        info!("根输入已下载: {} 字节", bytes);
        Ok(())
    }

    async fn extract_root(
        &self,
        task: &ExtractionTask,
        affinity: &AffinityKey,
    ) -> ExtractorResult<ExtractionOutcome> {
        self.deps
            .executor
            .execute(&self.extraction_options("extract_root", affinity), |ctx| async move {
                self.deps.extraction.run(&ctx, task).await
            })
            .await
    }

    /// 下载并提取根文件，把内联返回的嵌入对象补写到日志，然后保存根检查点
    async fn root_phase(
        &self,
        run_id: &str,
        request: &ProcessRequest,
        workspace: &Workspace,
        root_task: &ExtractionTask,
        relay_key: &RelayKey,
    ) -> ExtractorResult<RootCheckpoint> {
        self.download_input(request, workspace).await?;
        let root = self.extract_root(root_task, &workspace.affinity_key).await?;
        info!(
            "根提取完成: 产物 {}, 追加至 {:?}",
            root.produced.len(),
            root.appended_through
        );

        // 内联返回的嵌入对象与引擎直接写入的发现走同一条路径
        let mut appended_through = root.appended_through;
        for artifact in &root.embedded {
            let id = self
                .deps
                .relay_log
                .append(
                    relay_key,
                    &artifact.path,
                    &artifact.mimetype,
                    artifact.checksum.as_deref().unwrap_or(""),
                )
                .await?;
            appended_through = Some(appended_through.map_or(id, |prev: EntryId| prev.max(id)));
        }

        let checkpoint = RootCheckpoint {
            root,
            appended_through,
        };
        self.deps
            .checkpoints
            .save(&root_instance(run_id), serde_json::to_value(&checkpoint)?)
            .await?;
        Ok(checkpoint)
    }

    /// 恢复时的扩展控制器和输出中继状态
    ///
    /// 中继游标退回到控制器检查点的高水位，控制器检查点之后转发过的条目会重新送达。
    async fn recovered_states(
        &self,
        run_id: &str,
        settings: ExpansionSettings,
    ) -> ExtractorResult<(ExpansionState, RelayState)> {
        let store = self.deps.checkpoints.as_ref();
        let expansion: Option<ExpansionCheckpoint> =
            load_checkpoint(store, &expansion_instance(run_id)).await?;
        let relay: Option<RelayCheckpoint> = load_checkpoint(store, &relay_instance(run_id)).await?;

        let relay_key = settings.relay_key.clone();
        let expansion = match expansion {
            Some(checkpoint) => ExpansionState::recover(checkpoint),
            None => ExpansionState::new(settings),
        };
        let mut relay = match relay {
            Some(checkpoint) => RelayState::resume(checkpoint),
            None => RelayState::new(relay_key),
        };
        relay.rewind_to(expansion.high_water());
        info!(
            "运行 {} 恢复: 未完成子任务 {}, 中继游标 {}",
            run_id,
            expansion.outstanding(),
            relay.cursor()
        );
        Ok((expansion, relay))
    }

    async fn extract_recursively(
        &self,
        run_id: &str,
        request: &ProcessRequest,
        workspace: &Workspace,
        root_task: &ExtractionTask,
        relay_key: RelayKey,
        resume: Option<RootCheckpoint>,
    ) -> ExtractorResult<(ExtractionOutcome, ExpansionReport, RelayReport)> {
        let affinity = &workspace.affinity_key;
        let settings = ExpansionSettings {
            working_dir: workspace.working_dir.clone(),
            output_kinds: request.root_output_kinds(),
            relay_key: relay_key.clone(),
            deduplicate: self.config.deduplicate_by_checksum,
        };
        let (expansion_state, relay_state) = match resume {
            Some(_) => self.recovered_states(run_id, settings).await?,
            None => (ExpansionState::new(settings), RelayState::new(relay_key.clone())),
        };

        let (expansion_handle, expansion_events) = expansion_channel();
        let (relay_handle, relay_terminate) = relay_channel();

        let controller = ExpansionController::new(
            expansion_instance(run_id),
            Arc::clone(&self.deps.extraction),
            Arc::clone(&self.deps.executor),
            self.extraction_options("extract_child", affinity),
            Arc::clone(&self.deps.checkpoints),
            self.config.max_history_length,
        );
        let mut expansion = AbortOnDrop(tokio::spawn(async move {
            controller.run(expansion_state, expansion_events).await
        }));

        let relay = OutputRelay::new(
            relay_instance(run_id),
            Arc::clone(&self.deps.relay_log),
            Arc::clone(&self.deps.executor),
            self.extraction_options("tail_output", affinity),
            RelaySettings::from_config(&self.config),
            Arc::clone(&self.deps.checkpoints),
            self.config.max_history_length,
        );
        let target = expansion_handle.clone();
        let mut relay = AbortOnDrop(tokio::spawn(async move {
            relay.run(relay_state, target, relay_terminate).await
        }));

        let root_phase = async {
            match resume {
                Some(checkpoint) => Ok(checkpoint),
                None => {
                    self.root_phase(run_id, request, workspace, root_task, &relay_key)
                        .await
                }
            }
        };
        let root = tokio::select! {
            root = root_phase => root?,
            finished = join_component(&mut expansion, "扩展控制器") => {
                return Err(exited_early("扩展控制器", finished));
            }
            finished = join_component(&mut relay, "输出中继") => {
                return Err(exited_early("输出中继", finished));
            }
        };

        // 控制器已退出时发送失败，由下面的 join 取得它的结果
        if let Err(e) = expansion_handle.terminate(root.appended_through) {
            warn!("通知扩展控制器终止失败: {}", e);
        }
        let expansion_report = tokio::select! {
            report = join_component(&mut expansion, "扩展控制器") => report?,
            finished = join_component(&mut relay, "输出中继") => {
                return Err(exited_early("输出中继", finished));
            }
        };

        if let Err(e) = relay_handle.terminate() {
            warn!("通知输出中继停止失败: {}", e);
        }
        let relay_report = join_component(&mut relay, "输出中继").await?;

        if let Err(e) = self.deps.checkpoints.clear(&root_instance(run_id)).await {
            warn!("清理根检查点失败: {}", e);
        }
        if let Err(e) = self.deps.relay_log.delete(&relay_key).await {
            warn!("删除追加日志 {} 失败: {}", relay_key, e);
        }
        Ok((root.root, expansion_report, relay_report))
    }

    async fn release(&self, workspace: &Workspace) {
        let paths = vec![
            workspace.root_path.clone(),
            workspace.working_dir.clone(),
            workspace.archive_path(),
        ];
        let result = self
            .deps
            .executor
            .execute(
                &self.transfer_options("release_workspace", &workspace.affinity_key),
                |_| self.deps.workspace_manager.release(&paths),
            )
            .await;
        if let Err(e) = result {
            warn!("释放工作区失败: {}", e);
        }
    }
}
