use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use extractor_core::config::RedisConfig;
use extractor_core::models::{EntryId, RelayKey};
use extractor_core::traits::RelayLog;
use extractor_infrastructure::RedisRelayLog;
use tokio::time::timeout;
use uuid::Uuid;

fn test_config() -> RedisConfig {
    RedisConfig {
        host: "127.0.0.1".to_string(),
        port: 6379,
        database: 0,
        password: None,
        connection_timeout_seconds: 5,
        max_stream_length: 0,
    }
}

fn unique_key() -> RelayKey {
    RelayKey::for_run(&format!("it-{}", Uuid::new_v4()))
}

#[tokio::test]
#[ignore] // Ignore by default since it requires Redis
async fn test_redis_relay_append_and_read() -> Result<()> {
    let log = RedisRelayLog::new(test_config()).await?;
    let key = unique_key();

    let first = log.append(&key, "/w/a.eml", "message/rfc822", "c1").await?;
    let second = log.append(&key, "/w/b.pdf", "application/pdf", "c2").await?;
    assert!(first < second);
    assert_eq!(log.len(&key).await?, 2);

    let entries = log.read(&key, EntryId::START, 10, Duration::ZERO).await?;
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].id, first);
    assert_eq!(entries[0].path, "/w/a.eml");
    assert_eq!(entries[0].mimetype, "message/rfc822");
    assert_eq!(entries[1].checksum, "c2");

    let after_first = log.read(&key, first, 10, Duration::ZERO).await?;
    assert_eq!(after_first.len(), 1);
    assert_eq!(after_first[0].id, second);

    log.delete(&key).await?;
    assert_eq!(log.len(&key).await?, 0);
    Ok(())
}

#[tokio::test]
#[ignore] // Ignore by default since it requires Redis
async fn test_redis_relay_blocking_read_returns_empty() -> Result<()> {
    let log = RedisRelayLog::new(test_config()).await?;
    let key = unique_key();

    let entries = timeout(
        Duration::from_secs(5),
        log.read(&key, EntryId::START, 10, Duration::from_millis(200)),
    )
    .await??;
    assert!(entries.is_empty());
    Ok(())
}

#[tokio::test]
#[ignore] // Ignore by default since it requires Redis
async fn test_redis_relay_blocking_read_sees_late_append() -> Result<()> {
    let log = Arc::new(RedisRelayLog::new(test_config()).await?);
    let key = unique_key();

    let reader = {
        let log = log.clone();
        let key = key.clone();
        tokio::spawn(async move {
            log.read(&key, EntryId::START, 10, Duration::from_secs(3))
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    log.append(&key, "/w/late.txt", "text/plain", "").await?;

    let entries = reader.await??;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].path, "/w/late.txt");

    log.delete(&key).await?;
    Ok(())
}

#[tokio::test]
#[ignore] // Ignore by default since it requires Redis
async fn test_redis_health_check() -> Result<()> {
    let log = RedisRelayLog::new(test_config()).await?;
    assert!(log.health_check().await);
    Ok(())
}
