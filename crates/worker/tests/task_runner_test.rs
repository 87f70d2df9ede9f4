#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use extractor_core::models::{ActivityContext, RelayKey};
use extractor_core::traits::ExtractionActivity;
use extractor_core::ErrorKind;
use extractor_testing_utils::{MockRelayLog, TaskBuilder};
use extractor_worker::{CommandExtractionEngine, ExtractionTaskRunner};

fn shell_engine(script: &str) -> Arc<CommandExtractionEngine> {
    Arc::new(CommandExtractionEngine::new(
        "sh",
        vec!["-c".to_string(), script.to_string()],
        Duration::from_millis(20),
    ))
}

#[tokio::test]
async fn test_command_engine_discoveries_are_relayed() {
    let dir = tempfile::tempdir().unwrap();
    let engine = shell_engine(
        r#"cat > /dev/null; echo '{"produced":[{"path":"out/body.txt","mimetype":"text/plain"}],"embedded":[{"path":"/x/1.eml","mimetype":"message/rfc822","checksum":"a"},{"path":"/x/2.eml","mimetype":"message/rfc822","checksum":"b"}]}'"#,
    );
    let log = Arc::new(MockRelayLog::new());
    let runner = ExtractionTaskRunner::new(engine, log.clone(), 8);

    let key = RelayKey::for_run("wt");
    let task = TaskBuilder::new()
        .with_source(dir.path().join("mail.pst"))
        .with_target_dir(dir.path().join("output"))
        .with_mimetype("application/vnd.ms-outlook")
        .with_relay_key(&key)
        .build();

    let outcome = runner
        .run(&ActivityContext::detached("extract"), &task)
        .await
        .unwrap();

    assert_eq!(outcome.produced.len(), 1);
    let entries = log.entries(&key);
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].checksum, "b");
    assert_eq!(outcome.appended_through, Some(entries[1].id));
}

#[tokio::test]
async fn test_command_engine_bad_input_is_not_retryable() {
    let dir = tempfile::tempdir().unwrap();
    let runner = ExtractionTaskRunner::new(
        shell_engine("cat > /dev/null; echo 'cannot open' >&2; exit 2"),
        Arc::new(MockRelayLog::new()),
        1,
    );
    let task = TaskBuilder::new()
        .with_target_dir(dir.path().join("output"))
        .build();

    let err = runner
        .run(&ActivityContext::detached("extract"), &task)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidMimeType);
    assert!(err.to_string().contains("cannot open"));
}
