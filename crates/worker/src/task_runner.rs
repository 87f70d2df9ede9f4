use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use extractor_core::models::{
    ActivityContext, ArtifactRef, EntryId, ExtractionOutcome, ExtractionTask, RelayKey,
};
use extractor_core::traits::{ExtractionActivity, ExtractionEngine, RelayLog};
use extractor_core::{ExtractorError, ExtractorResult};
use metrics::{counter, gauge, histogram};
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

/// 提取任务执行器
///
/// 负责：
/// - 校验 MIME 类型
/// - 限制同时运行的提取会话数
/// - 调用提取引擎并规范化结果：提供了中继键时，内联返回的嵌入对象
///   追加到日志，使递归统一经过输出中继
///
/// 追加中途失败时记下已写入的条目，同一任务重试时按顺序复用，
/// 日志里不会出现重复条目。
pub struct ExtractionTaskRunner {
    engine: Arc<dyn ExtractionEngine>,
    relay_log: Arc<dyn RelayLog>,
    sessions: Arc<Semaphore>,
    pending_appends: Mutex<HashMap<(RelayKey, PathBuf), Vec<(String, EntryId)>>>,
}

impl ExtractionTaskRunner {
    pub fn new(
        engine: Arc<dyn ExtractionEngine>,
        relay_log: Arc<dyn RelayLog>,
        max_concurrent_sessions: usize,
    ) -> Self {
        Self {
            engine,
            relay_log,
            sessions: Arc::new(Semaphore::new(max_concurrent_sessions.max(1))),
            pending_appends: Mutex::new(HashMap::new()),
        }
    }

    pub fn available_sessions(&self) -> usize {
        self.sessions.available_permits()
    }

    async fn relay_embedded(
        &self,
        ctx: &ActivityContext,
        task: &ExtractionTask,
        embedded: Vec<ArtifactRef>,
    ) -> ExtractorResult<(Vec<ArtifactRef>, Option<EntryId>)> {
        let Some(key) = &task.relay_key else {
            return Ok((embedded, None));
        };

        let progress_key = (key.clone(), task.source.clone());
        let mut recorded = self
            .pending_appends
            .lock()
            .await
            .remove(&progress_key)
            .unwrap_or_default()
            .into_iter();

        let mut progress = Vec::with_capacity(embedded.len());
        for artifact in &embedded {
            let reused = match recorded.next() {
                Some((path, id)) if path == artifact.path => Some(id),
                _ => {
                    recorded = Vec::new().into_iter();
                    None
                }
            };
            let id = match reused {
                Some(id) => id,
                None => {
                    let appended = self
                        .relay_log
                        .append(
                            key,
                            &artifact.path,
                            &artifact.mimetype,
                            artifact.checksum.as_deref().unwrap_or(""),
                        )
                        .await;
                    match appended {
                        Ok(id) => id,
                        Err(e) => {
                            if !progress.is_empty() {
                                debug!(
                                    "追加中断，已记录 {} 个写入的条目: source={}",
                                    progress.len(),
                                    task.source.display()
                                );
                                self.pending_appends.lock().await.insert(progress_key, progress);
                            }
                            return Err(e);
                        }
                    }
                }
            };
            progress.push((artifact.path.clone(), id));
            ctx.heartbeat();
        }
        let appended_through = progress.iter().map(|(_, id)| *id).max();
        if !embedded.is_empty() {
            debug!("已将 {} 个嵌入对象写入追加日志 {}", embedded.len(), key);
        }
        Ok((Vec::new(), appended_through))
    }
}

/// 空值表示由引擎识别，否则必须形如 `type/subtype`
pub fn validate_mimetype(mimetype: &str) -> ExtractorResult<()> {
    if mimetype.is_empty() {
        return Ok(());
    }
    let valid = match mimetype.split_once('/') {
        Some((kind, subtype)) => {
            let token = |s: &str| {
                !s.is_empty()
                    && s.chars()
                        .all(|c| c.is_ascii_alphanumeric() || "!#$&-^_.+".contains(c))
            };
            let subtype = subtype.split(';').next().unwrap_or("").trim();
            token(kind) && token(subtype)
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ExtractorError::InvalidMimeType(mimetype.to_string()))
    }
}

#[async_trait]
impl ExtractionActivity for ExtractionTaskRunner {
    async fn run(
        &self,
        ctx: &ActivityContext,
        task: &ExtractionTask,
    ) -> ExtractorResult<ExtractionOutcome> {
        validate_mimetype(&task.mimetype)?;

        let _permit = self
            .sessions
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ExtractorError::Cancelled)?;
        tokio::fs::create_dir_all(&task.target_dir).await?;

        gauge!("extraction_sessions_active").increment(1.0);
        let start_time = Instant::now();
        let result = self.engine.extract(ctx, task).await;

        gauge!("extraction_sessions_active").decrement(1.0);
        histogram!("extraction_duration_seconds").record(start_time.elapsed().as_secs_f64());

        let result = match result {
            Ok(result) => result,
            Err(e) => {
                counter!("extraction_failures_total").increment(1);
                warn!("提取失败: source={}, error={}", task.source.display(), e);
                return Err(e);
            }
        };

        let embedded_count = result.embedded.len();
        let (embedded, appended_through) = self.relay_embedded(ctx, task, result.embedded).await?;

        counter!("extraction_success_total").increment(1);
        info!(
            "提取完成: source={}, produced={}, embedded={}, engine={}",
            task.source.display(),
            result.produced.len(),
            embedded_count,
            self.engine.name()
        );

        Ok(ExtractionOutcome {
            produced: result.produced,
            embedded,
            appended_through: appended_through.max(result.appended_through),
        })
    }
}
