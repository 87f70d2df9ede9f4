use std::sync::Arc;

use anyhow::{Context, Result};
use extractor_core::models::{ObjectLocator, ProcessRequest};
use extractor_core::AppConfig;
use extractor_infrastructure::{
    LocalObjectStore, LocalWorkspaceManager, RelayLogFactory, ZipArchiver,
};
use extractor_orchestrator::{
    aggregator_channel, ActivityExecutor, ActivityOptions, AggregationReport, PipelineDeps,
    PipelineReport, ResultAggregator, RootPipeline,
};
use extractor_worker::{CommandExtractionEngine, ExtractionTaskRunner};
use tracing::{info, warn};

/// 主应用程序：由配置一次性构建所有协作者
pub struct Application {
    config: AppConfig,
    deps: PipelineDeps,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        let worker = config.worker.affinity();
        info!("初始化应用程序，节点亲和性键: {}", worker);

        let relay_log = RelayLogFactory::create(&config.relay_log)
            .await
            .context("创建追加日志失败")?;
        let checkpoints = RelayLogFactory::create_checkpoint_store(&config.orchestrator);

        let engine = Arc::new(CommandExtractionEngine::from_config(&config.worker));
        let runner = ExtractionTaskRunner::new(
            engine,
            relay_log.clone(),
            config.worker.max_concurrent_sessions,
        );

        let deps = PipelineDeps {
            workspace_manager: Arc::new(LocalWorkspaceManager::new(
                config.workspace.base_dir.clone(),
            )),
            object_store: Arc::new(LocalObjectStore::new(config.object_store.root_dir.clone())),
            extraction: Arc::new(runner),
            relay_log,
            archiver: Arc::new(ZipArchiver::new()),
            checkpoints,
            executor: Arc::new(ActivityExecutor::new(worker)),
        };

        info!("应用程序初始化完成");
        Ok(Self { config, deps })
    }

    pub async fn process(&self, request: &ProcessRequest) -> Result<PipelineReport> {
        if request.run_id.is_some() && self.config.orchestrator.checkpoint_dir.is_none() {
            warn!("未设置 checkpoint_dir，检查点只保存在内存中，进程退出后运行无法继续");
        }
        let pipeline = RootPipeline::new(
            self.deps.clone(),
            self.config.orchestrator.clone(),
            self.config.retry.clone(),
        );
        let report = pipeline
            .run(request)
            .await
            .with_context(|| format!("处理 {} 失败", request.input))?;
        Ok(report)
    }

    /// 把一组已有对象合并为一个输出对象
    pub async fn collect(&self, output: &str, inputs: &[String]) -> Result<AggregationReport> {
        let output = ObjectLocator::parse(output)
            .with_context(|| format!("无效的输出定位符: {output}"))?;

        let aggregator = ResultAggregator::new(
            self.deps.workspace_manager.clone(),
            self.deps.object_store.clone(),
            self.deps.archiver.clone(),
            self.deps.executor.clone(),
            ActivityOptions::new(
                "transfer",
                self.config.orchestrator.transfer_timeout(),
                self.config.retry.clone(),
            ),
        );

        let (handle, inbox) = aggregator_channel();
        for input in inputs {
            handle.add(input.as_str())?;
        }
        handle.finish(inputs.len() as u64)?;

        let report = aggregator
            .run(&output, inbox)
            .await
            .context("合并结果失败")?;
        Ok(report)
    }
}
