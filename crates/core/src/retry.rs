use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{ErrorKind, ExtractorError, ExtractorResult};

/// 重试策略
///
/// 应用于所有对外可见的活动调用：指数退避，达到上限后封顶，
/// 最多尝试 `maximum_attempts` 次。`non_retryable_errors` 中列出的错误类型
/// 以及 [`ExtractorError::is_retryable`] 为 false 的错误立即失败。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub initial_interval_ms: u64,
    pub backoff_coefficient: f64,
    pub maximum_interval_ms: u64,
    pub maximum_attempts: u32,
    pub non_retryable_errors: Vec<ErrorKind>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval_ms: 1_000,
            backoff_coefficient: 2.0,
            maximum_interval_ms: 100_000,
            maximum_attempts: 10,
            non_retryable_errors: vec![ErrorKind::MalformedLocator, ErrorKind::InvalidMimeType],
        }
    }
}

impl RetryPolicy {
    /// 只尝试一次
    pub fn no_retry() -> Self {
        Self {
            maximum_attempts: 1,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> ExtractorResult<()> {
        if self.maximum_attempts == 0 {
            return Err(ExtractorError::config_error("最大尝试次数必须大于0"));
        }
        if self.backoff_coefficient < 1.0 {
            return Err(ExtractorError::config_error("退避系数不能小于1.0"));
        }
        if self.initial_interval_ms > self.maximum_interval_ms {
            return Err(ExtractorError::config_error("初始重试间隔不能大于最大重试间隔"));
        }
        Ok(())
    }

    /// 第 `attempt` 次尝试（从1开始）失败后的等待时间
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let interval = self.initial_interval_ms as f64 * self.backoff_coefficient.powi(exponent);
        let capped = interval.min(self.maximum_interval_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// 第 `attempt` 次尝试失败后是否还应继续
    pub fn should_retry(&self, err: &ExtractorError, attempt: u32) -> bool {
        if attempt >= self.maximum_attempts {
            return false;
        }
        err.is_retryable() && !self.non_retryable_errors.contains(&err.kind())
    }

    /// 按策略执行操作，闭包参数为当前尝试序号
    pub async fn execute<T, F, Fut>(&self, name: &str, mut operation: F) -> ExtractorResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = ExtractorResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) if self.should_retry(&err, attempt) => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "活动 {} 第 {} 次尝试失败: {}，{:?} 后重试",
                        name, attempt, err, delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    debug!("活动 {} 在第 {} 次尝试后放弃: {}", name, attempt, err);
                    return Err(err);
                }
            }
        }
    }
}
