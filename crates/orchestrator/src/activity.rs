use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use extractor_core::models::{ActivityContext, AffinityKey};
use extractor_core::{ExtractorError, ExtractorResult, RetryPolicy};
use metrics::counter;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, instrument};

/// 活动调用选项
#[derive(Debug, Clone)]
pub struct ActivityOptions {
    pub name: String,
    /// 单次尝试的最长执行时间
    pub start_to_close: Duration,
    /// 两次心跳之间允许的最长间隔，`None` 表示不监控心跳
    pub heartbeat_timeout: Option<Duration>,
    pub retry: RetryPolicy,
    /// 必须在该节点上执行
    pub affinity: Option<AffinityKey>,
}

impl ActivityOptions {
    pub fn new<S: Into<String>>(name: S, start_to_close: Duration, retry: RetryPolicy) -> Self {
        Self {
            name: name.into(),
            start_to_close,
            heartbeat_timeout: None,
            retry,
            affinity: None,
        }
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = Some(timeout);
        self
    }

    pub fn pinned_to(mut self, affinity: &AffinityKey) -> Self {
        self.affinity = Some(affinity.clone());
        self
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityStats {
    pub invocations: u64,
    pub attempts: u64,
    pub failed_attempts: u64,
}

/// 活动执行器
///
/// 为每次活动调用提供重试、单次尝试超时、心跳监控和节点亲和性检查。
/// 执行器代表一个工作节点，只运行亲和性与自身一致的活动。
pub struct ActivityExecutor {
    worker: AffinityKey,
    stats: Mutex<HashMap<String, ActivityStats>>,
}

impl ActivityExecutor {
    pub fn new(worker: AffinityKey) -> Self {
        Self {
            worker,
            stats: Mutex::new(HashMap::new()),
        }
    }

    pub fn worker(&self) -> &AffinityKey {
        &self.worker
    }

    /// 指定活动的累计统计
    pub fn stats(&self, activity: &str) -> ActivityStats {
        self.stats
            .lock()
            .map(|stats| stats.get(activity).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn record(&self, activity: &str, update: impl FnOnce(&mut ActivityStats)) {
        if let Ok(mut stats) = self.stats.lock() {
            update(stats.entry(activity.to_string()).or_default());
        }
    }

    /// 按选项执行活动，`operation` 每次尝试调用一次
    #[instrument(skip(self, options, operation), fields(activity = %options.name))]
    pub async fn execute<T, F, Fut>(&self, options: &ActivityOptions, operation: F) -> ExtractorResult<T>
    where
        F: Fn(ActivityContext) -> Fut,
        Fut: Future<Output = ExtractorResult<T>>,
    {
        self.record(&options.name, |s| s.invocations += 1);
        let operation = &operation;
        options
            .retry
            .execute(&options.name, move |attempt| {
                self.run_attempt(options, attempt, operation)
            })
            .await
    }

    async fn run_attempt<T, F, Fut>(
        &self,
        options: &ActivityOptions,
        attempt: u32,
        operation: &F,
    ) -> ExtractorResult<T>
    where
        F: Fn(ActivityContext) -> Fut,
        Fut: Future<Output = ExtractorResult<T>>,
    {
        self.record(&options.name, |s| s.attempts += 1);
        counter!("activity_attempts_total", "activity" => options.name.clone()).increment(1);

        let result = self.guarded_attempt(options, attempt, operation).await;
        if let Err(e) = &result {
            self.record(&options.name, |s| s.failed_attempts += 1);
            counter!("activity_failures_total", "activity" => options.name.clone()).increment(1);
            debug!("活动 {} 第 {} 次尝试失败: {}", options.name, attempt, e);
        }
        result
    }

    async fn guarded_attempt<T, F, Fut>(
        &self,
        options: &ActivityOptions,
        attempt: u32,
        operation: &F,
    ) -> ExtractorResult<T>
    where
        F: Fn(ActivityContext) -> Fut,
        Fut: Future<Output = ExtractorResult<T>>,
    {
        if let Some(expected) = &options.affinity {
            if expected != &self.worker {
                return Err(ExtractorError::AffinityViolation {
                    expected: expected.to_string(),
                    actual: self.worker.to_string(),
                });
            }
        }

        let (ctx, beats) = ActivityContext::new(&options.name, attempt, self.worker.clone());
        let work = watch_heartbeats(&options.name, options.heartbeat_timeout, beats, operation(ctx));

        match tokio::time::timeout(options.start_to_close, work).await {
            Ok(result) => result,
            Err(_) => Err(ExtractorError::Timeout(format!(
                "活动 {} 超过 {:?} 未完成",
                options.name, options.start_to_close
            ))),
        }
    }
}

async fn watch_heartbeats<T, Fut>(
    activity: &str,
    heartbeat_timeout: Option<Duration>,
    mut beats: watch::Receiver<u64>,
    work: Fut,
) -> ExtractorResult<T>
where
    Fut: Future<Output = ExtractorResult<T>>,
{
    let Some(limit) = heartbeat_timeout else {
        return work.await;
    };

    tokio::pin!(work);
    loop {
        let beat = tokio::select! {
            result = &mut work => return result,
            changed = tokio::time::timeout(limit, beats.changed()) => changed,
        };
        match beat {
            Ok(Ok(())) => continue,
            // 上下文已被活动丢弃，不会再有心跳
            Ok(Err(_)) => return work.await,
            Err(_) => {
                return Err(ExtractorError::HeartbeatTimeout {
                    activity: activity.to_string(),
                })
            }
        }
    }
}
