//! 结果汇总器
//!
//! 另一种拓扑：独立提取出的产物通过 `add` 信号逐个上报，
//! 调用方最后通过 `finish` 声明总数。两种信号可以任意顺序到达，
//! 收到的 `add` 数量达到声明总数后，汇总器下载全部产物并上传：
//! 没有产物时不上传，只有一个时直接上传，多个时打包后上传。

use std::path::PathBuf;
use std::sync::Arc;

use extractor_core::models::{ObjectLocator, Workspace};
use extractor_core::traits::{Archiver, ObjectStore, WorkspaceManager};
use extractor_core::{ExtractorError, ExtractorResult};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::activity::{ActivityExecutor, ActivityOptions};

/// 汇总进度
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregationState {
    received: u64,
    declared_total: Option<u64>,
}

impl AggregationState {
    pub fn on_add(&mut self) -> u64 {
        self.received += 1;
        self.received
    }

    /// 以最后一次声明为准
    pub fn on_finish(&mut self, total: u64) {
        self.declared_total = Some(total);
    }

    pub fn is_satisfied(&self) -> bool {
        self.declared_total
            .is_some_and(|total| self.received >= total)
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn declared_total(&self) -> Option<u64> {
        self.declared_total
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregationReport {
    /// 收到的 add 信号数
    pub count: u64,
    pub downloaded: u64,
    /// 定位符无效或下载失败的产物
    pub failed: u64,
    pub output_locator: Option<ObjectLocator>,
}

/// 向汇总器发送信号的句柄
#[derive(Debug, Clone)]
pub struct AggregatorHandle {
    adds: mpsc::UnboundedSender<String>,
    finish: mpsc::UnboundedSender<u64>,
}

impl AggregatorHandle {
    pub fn add<S: Into<String>>(&self, locator: S) -> ExtractorResult<()> {
        self.adds
            .send(locator.into())
            .map_err(|_| ExtractorError::ChannelClosed("结果汇总器已退出".to_string()))
    }

    pub fn finish(&self, total: u64) -> ExtractorResult<()> {
        self.finish
            .send(total)
            .map_err(|_| ExtractorError::ChannelClosed("结果汇总器已退出".to_string()))
    }
}

/// 汇总器的信号接收端
pub struct AggregatorInbox {
    adds: mpsc::UnboundedReceiver<String>,
    finish: mpsc::UnboundedReceiver<u64>,
}

pub fn aggregator_channel() -> (AggregatorHandle, AggregatorInbox) {
    let (adds_tx, adds) = mpsc::unbounded_channel();
    let (finish_tx, finish) = mpsc::unbounded_channel();
    (
        AggregatorHandle {
            adds: adds_tx,
            finish: finish_tx,
        },
        AggregatorInbox { adds, finish },
    )
}

struct Collected {
    state: AggregationState,
    files: Vec<PathBuf>,
    failed: u64,
}

pub struct ResultAggregator {
    workspace_manager: Arc<dyn WorkspaceManager>,
    object_store: Arc<dyn ObjectStore>,
    archiver: Arc<dyn Archiver>,
    executor: Arc<ActivityExecutor>,
    transfer: ActivityOptions,
}

impl ResultAggregator {
    pub fn new(
        workspace_manager: Arc<dyn WorkspaceManager>,
        object_store: Arc<dyn ObjectStore>,
        archiver: Arc<dyn Archiver>,
        executor: Arc<ActivityExecutor>,
        transfer: ActivityOptions,
    ) -> Self {
        Self {
            workspace_manager,
            object_store,
            archiver,
            executor,
            transfer,
        }
    }

    fn options(&self, name: &str) -> ActivityOptions {
        let mut options = self.transfer.clone().pinned_to(self.executor.worker());
        options.name = name.to_string();
        options
    }

    pub async fn run(
        &self,
        output: &ObjectLocator,
        inbox: AggregatorInbox,
    ) -> ExtractorResult<AggregationReport> {
        let worker = self.executor.worker().clone();
        let run_id = format!("collect-{}", Uuid::new_v4());
        let workspace = self
            .executor
            .execute(&self.options("acquire_workspace"), |_| {
                self.workspace_manager.acquire(&worker, &run_id)
            })
            .await?;

        let result = self.aggregate(&workspace, output, inbox).await;

        let cleanup = vec![workspace.working_dir.clone(), workspace.archive_path()];
        if let Err(e) = self
            .executor
            .execute(&self.options("release_workspace"), |_| {
                self.workspace_manager.release(&cleanup)
            })
            .await
        {
            warn!("释放汇总工作区失败: {}", e);
        }
        result
    }

    async fn aggregate(
        &self,
        workspace: &Workspace,
        output: &ObjectLocator,
        inbox: AggregatorInbox,
    ) -> ExtractorResult<AggregationReport> {
        let collected = self.collect(workspace, inbox).await?;
        let count = collected.state.received();
        let downloaded = collected.files.len() as u64;

        let upload_source = match collected.files.as_slice() {
            [] => None,
            [single] => Some(single.clone()),
            files => {
                let archive = workspace.archive_path();
                let archive = self
                    .executor
                    .execute(&self.options("package_results"), |_| {
                        self.archiver.package_files(files, &archive)
                    })
                    .await?;
                Some(archive)
            }
        };

        let output_locator = match upload_source {
            Some(source) => Some(
                self.executor
                    .execute(&self.options("upload_results"), |_| {
                        self.object_store.upload(&source, output)
                    })
                    .await?,
            ),
            None => {
                info!("没有可上传的产物");
                None
            }
        };

        counter!("aggregated_artifacts_total").increment(downloaded);
        info!(
            "汇总完成: 收到 {}, 下载 {}, 失败 {}",
            count, downloaded, collected.failed
        );
        Ok(AggregationReport {
            count,
            downloaded,
            failed: collected.failed,
            output_locator,
        })
    }

    async fn collect(
        &self,
        workspace: &Workspace,
        mut inbox: AggregatorInbox,
    ) -> ExtractorResult<Collected> {
        let mut state = AggregationState::default();
        let mut downloads: JoinSet<ExtractorResult<PathBuf>> = JoinSet::new();
        let mut failed = 0;
        let mut adds_open = true;
        let mut finish_open = true;

        while !state.is_satisfied() {
            if !adds_open && !finish_open {
                return Err(ExtractorError::ChannelClosed(format!(
                    "汇总器在收齐前失去了信号来源: 已收到 {}, 声明 {:?}",
                    state.received(),
                    state.declared_total()
                )));
            }
            tokio::select! {
                add = inbox.adds.recv(), if adds_open => match add {
                    Some(raw) => {
                        let index = state.on_add();
                        match ObjectLocator::parse(&raw) {
                            Ok(locator) => {
                                let dest = workspace
                                    .target_dir_for(&index.to_string())
                                    .join(locator.file_name());
                                self.spawn_download(&mut downloads, locator, dest);
                            }
                            Err(e) => {
                                warn!("忽略无效的产物定位符: {}", e);
                                failed += 1;
                            }
                        }
                    }
                    None => adds_open = false,
                },
                total = inbox.finish.recv(), if finish_open => match total {
                    Some(total) => {
                        debug!("声明总数 {}", total);
                        state.on_finish(total);
                    }
                    None => finish_open = false,
                },
            }
        }

        let mut files = Vec::new();
        while let Some(joined) = downloads.join_next().await {
            match joined {
                Ok(Ok(path)) => files.push(path),
                Ok(Err(e)) => {
                    warn!("产物下载失败: {}", e);
                    failed += 1;
                }
                Err(e) => {
                    warn!("下载任务异常退出: {}", e);
                    failed += 1;
                }
            }
        }
        files.sort();

        Ok(Collected {
            state,
            files,
            failed,
        })
    }

    fn spawn_download(
        &self,
        downloads: &mut JoinSet<ExtractorResult<PathBuf>>,
        locator: ObjectLocator,
        dest: PathBuf,
    ) {
        let store = Arc::clone(&self.object_store);
        let executor = Arc::clone(&self.executor);
        let options = self.options("download_result");
        downloads.spawn(async move {
            executor
                .execute(&options, |_| store.download(&locator, &dest))
                .await?;
            Ok(dest)
        });
    }
}
