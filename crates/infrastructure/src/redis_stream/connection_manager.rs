use std::time::Duration;

use extractor_core::{config::RedisConfig, ExtractorError, ExtractorResult};
use metrics::counter;
use redis::aio::ConnectionManager;
use redis::Client;
use tracing::{debug, error, warn};

/// Redis连接管理，所有命令共享一个自动重连的 `ConnectionManager`
pub struct RedisConnectionManager {
    connection: ConnectionManager,
    config: RedisConfig,
}

impl RedisConnectionManager {
    pub async fn new(config: RedisConfig) -> ExtractorResult<Self> {
        let redis_url = config.build_connection_url();
        let client = Client::open(redis_url)
            .map_err(|e| ExtractorError::relay_log(format!("Failed to create Redis client: {e}")))?;

        let timeout = Duration::from_secs(config.connection_timeout_seconds);
        let connection = tokio::time::timeout(timeout, client.get_connection_manager())
            .await
            .map_err(|_| {
                ExtractorError::relay_log(format!(
                    "Connecting to Redis at {}:{} timed out",
                    config.host, config.port
                ))
            })?
            .map_err(|e| ExtractorError::relay_log(format!("Failed to connect to Redis: {e}")))?;

        let manager = Self {
            connection,
            config,
        };
        manager.ping().await?;
        debug!(
            "Successfully connected to Redis at {}:{}",
            manager.config.host, manager.config.port
        );
        Ok(manager)
    }

    pub fn config(&self) -> &RedisConfig {
        &self.config
    }

    pub async fn ping(&self) -> ExtractorResult<()> {
        let mut conn = self.connection.clone();
        let response: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| ExtractorError::relay_log(format!("Redis PING failed: {e}")))?;
        if response != "PONG" {
            let error_msg = format!("Unexpected PING response: {response}");
            error!("{}", error_msg);
            return Err(ExtractorError::relay_log(error_msg));
        }
        Ok(())
    }

    pub async fn execute_command<T: redis::FromRedisValue>(
        &self,
        cmd: &redis::Cmd,
    ) -> ExtractorResult<T> {
        let mut conn = self.connection.clone();
        cmd.query_async(&mut conn).await.map_err(|e| {
            counter!("redis_relay_command_errors_total").increment(1);
            ExtractorError::relay_log(format!("Redis command failed: {e}"))
        })
    }

    pub async fn health_check(&self) -> bool {
        match self.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!("Redis health check failed: {}", e);
                false
            }
        }
    }
}
