use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use extractor_core::models::{AffinityKey, ObjectLocator};
use extractor_core::{ErrorKind, RetryPolicy};
use extractor_infrastructure::ZipArchiver;
use extractor_orchestrator::{
    aggregator_channel, ActivityExecutor, ActivityOptions, ResultAggregator,
};
use extractor_testing_utils::{MockObjectStore, MockWorkspaceManager};

const OUTPUT: &str = "object://results/combined.zip";

fn aggregator(
    store: Arc<MockObjectStore>,
    workspaces: Arc<MockWorkspaceManager>,
) -> ResultAggregator {
    let retry = RetryPolicy {
        initial_interval_ms: 5,
        maximum_interval_ms: 10,
        maximum_attempts: 2,
        ..RetryPolicy::default()
    };
    ResultAggregator::new(
        workspaces,
        store,
        Arc::new(ZipArchiver::new()),
        Arc::new(ActivityExecutor::new(AffinityKey::new("w1"))),
        ActivityOptions::new("transfer", Duration::from_secs(10), retry),
    )
}

fn output() -> ObjectLocator {
    ObjectLocator::parse(OUTPUT).unwrap()
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
async fn test_finish_before_adds() {
    let store = Arc::new(
        MockObjectStore::new()
            .with_object("object://parts/a.txt", b"alpha")
            .with_object("object://parts/b.txt", b"beta")
            .with_object("object://parts/c.txt", b"gamma"),
    );
    let workspaces = Arc::new(MockWorkspaceManager::new());
    let aggregator = aggregator(store.clone(), workspaces.clone());
    let (handle, inbox) = aggregator_channel();

    handle.finish(3).unwrap();
    let running = tokio::spawn(async move { aggregator.run(&output(), inbox).await });
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!running.is_finished());

    handle.add("object://parts/a.txt").unwrap();
    handle.add("object://parts/b.txt").unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    // 已知总数为 3，收到 2 个时不能结束
    assert!(!running.is_finished());
    assert!(store.uploads().is_empty());

    handle.add("object://parts/c.txt").unwrap();
    let report = running.await.unwrap().unwrap();

    assert_eq!(report.count, 3);
    assert_eq!(report.downloaded, 3);
    assert_eq!(report.output_locator, Some(output()));
    assert_eq!(
        archive_names(store.object(OUTPUT).unwrap()),
        vec!["a.txt".to_string(), "b.txt".to_string(), "c.txt".to_string()]
    );
    assert_eq!(workspaces.release_calls(), 1);
    assert!(!workspaces.leaked());
}

#[tokio::test]
async fn test_single_artifact_uploaded_directly() {
    let store = Arc::new(MockObjectStore::new().with_object("object://parts/only.pdf", b"%PDF"));
    let aggregator = aggregator(store.clone(), Arc::new(MockWorkspaceManager::new()));
    let (handle, inbox) = aggregator_channel();

    handle.add("object://parts/only.pdf").unwrap();
    handle.finish(1).unwrap();
    let report = aggregator.run(&output(), inbox).await.unwrap();

    assert_eq!(report.count, 1);
    assert_eq!(store.object(OUTPUT).unwrap(), b"%PDF".to_vec());
}

#[tokio::test]
async fn test_nothing_added_means_no_upload() {
    let store = Arc::new(MockObjectStore::new());
    let aggregator = aggregator(store.clone(), Arc::new(MockWorkspaceManager::new()));
    let (handle, inbox) = aggregator_channel();

    handle.finish(0).unwrap();
    let report = aggregator.run(&output(), inbox).await.unwrap();

    assert_eq!(report.count, 0);
    assert!(report.output_locator.is_none());
    assert!(store.uploads().is_empty());
}

#[tokio::test]
async fn test_bad_artifacts_are_counted_and_skipped() {
    let store = Arc::new(
        MockObjectStore::new()
            .with_object("object://parts/good.txt", b"ok")
            .with_failing_download("object://parts/broken.txt"),
    );
    let aggregator = aggregator(store.clone(), Arc::new(MockWorkspaceManager::new()));
    let (handle, inbox) = aggregator_channel();

    handle.add("object://parts/good.txt").unwrap();
    handle.add("not a locator").unwrap();
    handle.add("object://parts/broken.txt").unwrap();
    handle.finish(3).unwrap();
    let report = aggregator.run(&output(), inbox).await.unwrap();

    assert_eq!(report.count, 3);
    assert_eq!(report.downloaded, 1);
    assert_eq!(report.failed, 2);
    assert_eq!(store.object(OUTPUT).unwrap(), b"ok".to_vec());
}

#[tokio::test]
async fn test_senders_dropped_before_total_reached() {
    let aggregator = aggregator(
        Arc::new(MockObjectStore::new()),
        Arc::new(MockWorkspaceManager::new()),
    );
    let (handle, inbox) = aggregator_channel();
    handle.finish(5).unwrap();
    drop(handle);

    let err = aggregator.run(&output(), inbox).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ChannelClosed);
}
