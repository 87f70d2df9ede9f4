use std::io::Cursor;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use extractor_core::config::OrchestratorConfig;
use extractor_core::models::{
    AffinityKey, EntryId, ExtractionOutcome, ExtractionTask, ProcessRequest, RelayKey,
};
use extractor_core::traits::{CheckpointStore, WorkspaceManager};
use extractor_core::{ErrorKind, ExtractorError, RetryPolicy};
use extractor_infrastructure::{InMemoryCheckpointStore, ZipArchiver};
use extractor_orchestrator::{
    ActivityExecutor, Checkpointed, ExpansionEvent, ExpansionSettings, ExpansionState,
    PipelineDeps, RelayState, RootCheckpoint, RootPipeline,
};
use extractor_testing_utils::{
    MockObjectStore, MockRelayLog, MockWorkspaceManager, ResultBuilder, ScriptedEngine, TestEnv,
};
use extractor_worker::ExtractionTaskRunner;

const INPUT: &str = "object://bucket/input.zip";
const OUTPUT: &str = "object://bucket/output.zip";

/// Run id whose workspace the scripted engines expect at `<base>/run-0`
const RUN: &str = "run-0";

struct Harness {
    store: Arc<MockObjectStore>,
    workspaces: Arc<MockWorkspaceManager>,
    relay_log: Arc<MockRelayLog>,
    checkpoints: Arc<InMemoryCheckpointStore>,
    executor: Arc<ActivityExecutor>,
    engine: Arc<ScriptedEngine>,
    pipeline: RootPipeline,
}

fn config() -> OrchestratorConfig {
    OrchestratorConfig {
        relay_poll_interval_ms: 5,
        relay_block_ms: 20,
        ..OrchestratorConfig::default()
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        initial_interval_ms: 1,
        maximum_interval_ms: 1,
        maximum_attempts: 2,
        ..RetryPolicy::default()
    }
}

/// The engine needs the root input path, which only exists once the mock
/// workspace manager has laid out the run directory.
fn harness(engine: impl FnOnce(&MockWorkspaceManager) -> ScriptedEngine) -> Harness {
    harness_with(RetryPolicy::default(), engine)
}

fn harness_with(
    retry: RetryPolicy,
    engine: impl FnOnce(&MockWorkspaceManager) -> ScriptedEngine,
) -> Harness {
    let store = Arc::new(MockObjectStore::new().with_object(INPUT, b"PK\x03\x04"));
    let workspaces = Arc::new(MockWorkspaceManager::new());
    let relay_log = Arc::new(MockRelayLog::new());
    let checkpoints = Arc::new(InMemoryCheckpointStore::new());
    let executor = Arc::new(ActivityExecutor::new(AffinityKey::new("node-a")));
    let engine = Arc::new(engine(&workspaces));
    let runner = ExtractionTaskRunner::new(engine.clone(), relay_log.clone(), 16);

    let deps = PipelineDeps {
        workspace_manager: workspaces.clone(),
        object_store: store.clone(),
        extraction: Arc::new(runner),
        relay_log: relay_log.clone(),
        archiver: Arc::new(ZipArchiver::new()),
        checkpoints: checkpoints.clone(),
        executor: executor.clone(),
    };
    Harness {
        store,
        workspaces,
        relay_log,
        checkpoints,
        executor,
        engine,
        pipeline: RootPipeline::new(deps, config(), retry),
    }
}

fn recursive_request() -> ProcessRequest {
    ProcessRequest::new(INPUT, OUTPUT)
        .with_recurse(true)
        .with_run_id(RUN)
}

fn archive_names(bytes: Vec<u8>) -> Vec<String> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
    let mut names: Vec<String> = (0..archive.len())
        .map(|i| archive.by_index(i).unwrap().name().to_string())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_recursive_run_packages_child_outputs() {
    TestEnv::init_tracing();
    let h = harness(|workspaces| {
        let root = workspaces.base_dir().join(RUN).join("root");
        ScriptedEngine::new()
            .with_result(
                root,
                ResultBuilder::new()
                    .embedded("/carved/first.eml", "message/rfc822")
                    .embedded("/carved/second.pdf", "application/pdf")
                    .build(),
            )
            .with_default(ResultBuilder::new().produced("body.txt", "text/plain").build())
    });

    let report = h.pipeline.run(&recursive_request()).await.unwrap();

    let expansion = report.expansion.unwrap();
    assert_eq!(expansion.discovered, 2);
    assert_eq!(expansion.succeeded, 2);
    assert_eq!(report.relay.unwrap().forwarded_entries, 2);
    assert_eq!(report.output_locator.to_string(), OUTPUT);
    assert!(report.root.produced.is_empty());

    let names = archive_names(h.store.object(OUTPUT).unwrap());
    assert_eq!(names, vec!["1-1/body.txt".to_string(), "1-2/body.txt".to_string()]);

    assert_eq!(h.workspaces.release_calls(), 1);
    assert!(!h.workspaces.leaked());
    assert_eq!(h.relay_log.append_count(), 2);
    assert_eq!(h.executor.stats("extract_child").invocations, 2);
}

#[tokio::test]
async fn test_grandchildren_are_extracted() {
    let h = harness(|workspaces| {
        let root = workspaces.base_dir().join(RUN).join("root");
        ScriptedEngine::new()
            .with_result(
                root,
                ResultBuilder::new()
                    .embedded("/carved/archive.zip", "application/zip")
                    .build(),
            )
            .with_result(
                "/carved/archive.zip",
                ResultBuilder::new()
                    .produced("listing.txt", "text/plain")
                    .embedded("/carved/inner.doc", "application/msword")
                    .build(),
            )
            .with_default(ResultBuilder::new().produced("body.txt", "text/plain").build())
    });

    let report = h.pipeline.run(&recursive_request()).await.unwrap();

    assert_eq!(report.expansion.unwrap().discovered, 2);
    let names = archive_names(h.store.object(OUTPUT).unwrap());
    assert_eq!(
        names,
        vec!["1-1/listing.txt".to_string(), "1-2/body.txt".to_string()]
    );
}

#[tokio::test]
async fn test_single_level_run_skips_expansion() {
    let h = harness(|workspaces| {
        let root = workspaces.base_dir().join(RUN).join("root");
        ScriptedEngine::new().with_result(
            root,
            ResultBuilder::new()
                .produced("text/content.txt", "text/plain")
                .embedded("/carved/ignored.eml", "message/rfc822")
                .build(),
        )
    });

    let request = ProcessRequest::new(INPUT, OUTPUT).with_run_id(RUN);
    let report = h.pipeline.run(&request).await.unwrap();

    assert!(report.expansion.is_none());
    assert!(report.relay.is_none());
    assert!(!report.resumed);
    assert_eq!(report.root.embedded.len(), 1);
    assert_eq!(h.relay_log.append_count(), 0);
    assert_eq!(h.relay_log.read_count(), 0);
    assert_eq!(h.executor.stats("extract_root").invocations, 1);
    assert_eq!(h.executor.stats("extract_child").invocations, 0);
    assert_eq!(h.engine.calls().len(), 1);
    assert_eq!(
        archive_names(h.store.object(OUTPUT).unwrap()),
        vec!["text/content.txt".to_string()]
    );
}

#[tokio::test]
async fn test_malformed_input_fails_without_retry() {
    let h = harness(|_| ScriptedEngine::new());

    let request = ProcessRequest::new("not a locator", OUTPUT).with_recurse(true);
    let err = h.pipeline.run(&request).await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::MalformedLocator);
    assert_eq!(h.executor.stats("download_input").attempts, 1);
    assert_eq!(h.executor.stats("extract_root").invocations, 0);
    assert_eq!(h.workspaces.release_calls(), 1);
    assert!(!h.workspaces.leaked());
    assert!(h.store.uploads().is_empty());
}

#[tokio::test]
async fn test_failed_child_does_not_fail_run() {
    let h = harness(|workspaces| {
        let root = workspaces.base_dir().join(RUN).join("root");
        ScriptedEngine::new()
            .with_result(
                root,
                ResultBuilder::new()
                    .embedded("/carved/good.txt", "text/plain")
                    .embedded("/carved/bad.bin", "application/octet-stream")
                    .build(),
            )
            .with_failure("/carved/bad.bin", || {
                ExtractorError::InvalidMimeType("application/octet-stream".to_string())
            })
            .with_default(ResultBuilder::new().produced("body.txt", "text/plain").build())
    });

    let report = h.pipeline.run(&recursive_request()).await.unwrap();

    let expansion = report.expansion.unwrap();
    assert_eq!(expansion.succeeded, 1);
    assert_eq!(expansion.failed, 1);
    assert_eq!(
        archive_names(h.store.object(OUTPUT).unwrap()),
        vec!["1-1/body.txt".to_string()]
    );
}

#[tokio::test]
async fn test_workspace_failure_is_fatal() {
    let store = Arc::new(MockObjectStore::new().with_object(INPUT, b"x"));
    let relay_log = Arc::new(MockRelayLog::new());
    let executor = Arc::new(ActivityExecutor::new(AffinityKey::new("node-a")));
    let deps = PipelineDeps {
        workspace_manager: Arc::new(MockWorkspaceManager::failing()),
        object_store: store.clone(),
        extraction: Arc::new(ExtractionTaskRunner::new(
            Arc::new(ScriptedEngine::new()),
            relay_log.clone(),
            1,
        )),
        relay_log,
        archiver: Arc::new(ZipArchiver::new()),
        checkpoints: Arc::new(InMemoryCheckpointStore::new()),
        executor: executor.clone(),
    };
    let pipeline = RootPipeline::new(deps, config(), fast_retry());

    let err = pipeline
        .run(&ProcessRequest::new(INPUT, OUTPUT))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Workspace);
    assert_eq!(executor.stats("acquire_workspace").attempts, 2);
    assert!(store.downloads().is_empty());
}

#[tokio::test]
async fn test_relay_failure_fails_run_and_releases_workspace() {
    let h = harness_with(fast_retry(), |workspaces| {
        let root = workspaces.base_dir().join(RUN).join("root");
        ScriptedEngine::new()
            .with_result(
                root,
                ResultBuilder::new()
                    .embedded("/carved/first.eml", "message/rfc822")
                    .build(),
            )
            .with_default(ResultBuilder::new().produced("body.txt", "text/plain").build())
    });
    h.relay_log.fail_next_reads(1000);

    let result = tokio::time::timeout(
        Duration::from_secs(10),
        h.pipeline.run(&recursive_request()),
    )
    .await
    .expect("a dead relay must fail the run instead of hanging it");

    assert_eq!(result.unwrap_err().kind(), ErrorKind::RelayLog);
    assert_eq!(h.executor.stats("tail_output").attempts, 2);
    assert_eq!(h.workspaces.release_calls(), 1);
    assert!(!h.workspaces.leaked());
    assert!(h.store.uploads().is_empty());
    assert_eq!(h.checkpoints.len().await, 0);
    assert!(h.relay_log.entries(&RelayKey::for_run(RUN)).is_empty());
}

#[tokio::test]
async fn test_expansion_waits_for_entries_the_engine_appended_itself() {
    let h = harness(|workspaces| {
        let root = workspaces.base_dir().join(RUN).join("root");
        ScriptedEngine::new()
            .with_result(
                root,
                ResultBuilder::new()
                    .appended_through(EntryId::new(1, 1))
                    .build(),
            )
            .with_default(ResultBuilder::new().produced("body.txt", "text/plain").build())
    });
    let relay_log = h.relay_log.clone();
    let store = h.store.clone();
    let pipeline = h.pipeline;

    let running = tokio::spawn(async move { pipeline.run(&recursive_request()).await });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!running.is_finished());

    // 引擎报告的条目晚于根提取结束才出现在日志中
    relay_log.push(&RelayKey::for_run(RUN), "/carved/late.eml", "message/rfc822", "");
    let report = running.await.unwrap().unwrap();

    assert_eq!(report.root.appended_through, Some(EntryId::new(1, 1)));
    let expansion = report.expansion.unwrap();
    assert_eq!(expansion.discovered, 1);
    assert_eq!(expansion.succeeded, 1);
    assert_eq!(
        archive_names(store.object(OUTPUT).unwrap()),
        vec!["1-1/body.txt".to_string()]
    );
}

#[tokio::test]
async fn test_interrupted_run_resumes_from_checkpoints() {
    TestEnv::init_tracing();
    let h = harness(|_| {
        ScriptedEngine::new()
            .with_default(ResultBuilder::new().produced("body.txt", "text/plain").build())
    });
    let run = "case-7";
    let key = RelayKey::for_run(run);
    let request = ProcessRequest::new(INPUT, OUTPUT)
        .with_recurse(true)
        .with_run_id(run);

    // 中断前：根提取完成，子任务 1-1 已完成，中继已转发 1-2 但控制器检查点还没看到它
    let workspace = h
        .workspaces
        .acquire(&AffinityKey::new("node-a"), run)
        .await
        .unwrap();
    tokio::fs::create_dir_all(workspace.working_dir.join("1-1"))
        .await
        .unwrap();
    tokio::fs::write(workspace.working_dir.join("1-1/body.txt"), b"done")
        .await
        .unwrap();

    let first = h.relay_log.push(&key, "/carved/a.eml", "message/rfc822", "");
    let second = h.relay_log.push(&key, "/carved/b.eml", "message/rfc822", "");
    let root = RootCheckpoint {
        root: ExtractionOutcome::default(),
        appended_through: Some(second),
    };
    h.checkpoints
        .save(&format!("{run}-root"), serde_json::to_value(&root).unwrap())
        .await
        .unwrap();

    let mut expansion = ExpansionState::new(ExpansionSettings {
        working_dir: workspace.working_dir.clone(),
        output_kinds: request.root_output_kinds(),
        relay_key: key.clone(),
        deduplicate: false,
    });
    expansion.apply(ExpansionEvent::RelayBatch(h.relay_log.entries(&key)[..1].to_vec()));
    expansion.take_launches();
    expansion.apply(ExpansionEvent::TaskCompleted {
        entry_id: first,
        succeeded: true,
        appended_through: None,
    });
    h.checkpoints
        .save(
            &format!("{run}-expansion"),
            serde_json::to_value(expansion.capture_checkpoint()).unwrap(),
        )
        .await
        .unwrap();

    let mut relay = RelayState::new(key.clone());
    relay.accept(h.relay_log.entries(&key));
    h.checkpoints
        .save(
            &format!("{run}-relay"),
            serde_json::to_value(relay.capture_checkpoint()).unwrap(),
        )
        .await
        .unwrap();

    let report = h.pipeline.run(&request).await.unwrap();

    assert!(report.resumed);
    assert_eq!(report.run_id, run);
    assert!(h.store.downloads().is_empty());
    assert_eq!(h.executor.stats("extract_root").invocations, 0);
    let sources: Vec<PathBuf> = h.engine.calls().into_iter().map(|t: ExtractionTask| t.source).collect();
    assert_eq!(sources, vec![PathBuf::from("/carved/b.eml")]);

    let expansion = report.expansion.unwrap();
    assert_eq!(expansion.discovered, 2);
    assert_eq!(expansion.succeeded, 2);
    assert_eq!(
        archive_names(h.store.object(OUTPUT).unwrap()),
        vec!["1-1/body.txt".to_string(), "1-2/body.txt".to_string()]
    );
    assert_eq!(h.workspaces.reopened().len(), 1);
    assert_eq!(h.checkpoints.len().await, 0);
    assert!(h.relay_log.entries(&key).is_empty());
    assert!(!h.workspaces.leaked());
}

#[tokio::test]
async fn test_stale_state_without_workspace_starts_over() {
    let run = "case-8";
    let h = harness(move |workspaces| {
        let root = workspaces.base_dir().join(run).join("root");
        ScriptedEngine::new()
            .with_result(
                root,
                ResultBuilder::new()
                    .embedded("/carved/fresh.eml", "message/rfc822")
                    .build(),
            )
            .with_default(ResultBuilder::new().produced("body.txt", "text/plain").build())
    });
    let key = RelayKey::for_run(run);
    h.relay_log.push(&key, "/carved/stale.eml", "message/rfc822", "");
    let root = RootCheckpoint {
        root: ExtractionOutcome::default(),
        appended_through: None,
    };
    h.checkpoints
        .save(&format!("{run}-root"), serde_json::to_value(&root).unwrap())
        .await
        .unwrap();

    let request = ProcessRequest::new(INPUT, OUTPUT)
        .with_recurse(true)
        .with_run_id(run);
    let report = h.pipeline.run(&request).await.unwrap();

    assert!(!report.resumed);
    assert_eq!(h.store.downloads().len(), 1);
    assert_eq!(h.executor.stats("extract_root").invocations, 1);
    assert_eq!(h.engine.call_count_for(std::path::Path::new("/carved/stale.eml")), 0);
    assert_eq!(h.engine.call_count_for(std::path::Path::new("/carved/fresh.eml")), 1);
    assert_eq!(report.expansion.unwrap().discovered, 1);
    assert_eq!(h.checkpoints.len().await, 0);
}

#[tokio::test]
async fn test_invalid_run_id_is_rejected_before_any_work() {
    let h = harness(|_| ScriptedEngine::new());
    let request = ProcessRequest::new(INPUT, OUTPUT).with_run_id("../etc");

    let err = h.pipeline.run(&request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(h.workspaces.acquired().is_empty());
    assert_eq!(h.workspaces.release_calls(), 0);
}

#[tokio::test]
async fn test_partial_append_failure_is_retried_without_duplicates() {
    let h = harness_with(fast_retry(), |workspaces| {
        let root = workspaces.base_dir().join(RUN).join("root");
        ScriptedEngine::new()
            .with_result(
                root,
                ResultBuilder::new()
                    .embedded("/carved/a.eml", "message/rfc822")
                    .embedded("/carved/b.eml", "message/rfc822")
                    .build(),
            )
            .with_default(ResultBuilder::new().produced("body.txt", "text/plain").build())
    });
    h.relay_log.fail_append_after(1);

    let report = h.pipeline.run(&recursive_request()).await.unwrap();

    assert_eq!(h.executor.stats("extract_root").attempts, 2);
    assert_eq!(h.relay_log.append_count(), 2);
    let expansion = report.expansion.unwrap();
    assert_eq!(expansion.discovered, 2);
    assert_eq!(expansion.succeeded, 2);
    assert_eq!(
        archive_names(h.store.object(OUTPUT).unwrap()),
        vec!["1-1/body.txt".to_string(), "1-2/body.txt".to_string()]
    );
}
