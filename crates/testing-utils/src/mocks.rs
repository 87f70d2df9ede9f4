//! Mock implementations for the collaborator traits
//!
//! In-memory test doubles that record every interaction, so tests can assert
//! on call counts and ordering without a real extraction engine, Redis or disk layout.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use extractor_core::models::{
    ActivityContext, AffinityKey, EntryId, ExtractionResult, ExtractionTask, ObjectLocator,
    RelayEntry, RelayKey, Workspace,
};
use extractor_core::traits::{ExtractionEngine, ObjectStore, RelayLog, WorkspaceManager};
use extractor_core::{ExtractorError, ExtractorResult};
use tempfile::TempDir;
use tokio::sync::Notify;

type ErrorFactory = fn() -> ExtractorError;

/// Scripted extraction engine
///
/// Results are looked up by task source path, falling back to a default.
/// Produced artifacts with relative paths are written into the task's
/// target directory and reported with their absolute path.
pub struct ScriptedEngine {
    results: Mutex<HashMap<PathBuf, ExtractionResult>>,
    default: Mutex<ExtractionResult>,
    failures: Mutex<HashMap<PathBuf, ErrorFactory>>,
    transient: Mutex<HashMap<PathBuf, u32>>,
    delay: Mutex<Option<Duration>>,
    calls: Mutex<Vec<ExtractionTask>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            results: Mutex::new(HashMap::new()),
            default: Mutex::new(ExtractionResult::default()),
            failures: Mutex::new(HashMap::new()),
            transient: Mutex::new(HashMap::new()),
            delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
        }
    }

    pub fn with_default(self, result: ExtractionResult) -> Self {
        *self.default.lock().unwrap() = result;
        self
    }

    pub fn with_result<P: Into<PathBuf>>(self, source: P, result: ExtractionResult) -> Self {
        self.results.lock().unwrap().insert(source.into(), result);
        self
    }

    /// Every call for `source` fails with the error built by `make`
    pub fn with_failure<P: Into<PathBuf>>(self, source: P, make: ErrorFactory) -> Self {
        self.failures.lock().unwrap().insert(source.into(), make);
        self
    }

    /// The first `times` calls for `source` fail with a retryable error
    pub fn with_transient_failures<P: Into<PathBuf>>(self, source: P, times: u32) -> Self {
        self.transient.lock().unwrap().insert(source.into(), times);
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<ExtractionTask> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count_for(&self, source: &Path) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|task| task.source == source)
            .count()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn materialize(task: &ExtractionTask, mut result: ExtractionResult) -> ExtractorResult<ExtractionResult> {
        for artifact in &mut result.produced {
            let path = PathBuf::from(&artifact.path);
            if path.is_relative() {
                let target = task.target_dir.join(&path);
                if let Some(parent) = target.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(&target, task.source.to_string_lossy().as_bytes())?;
                artifact.path = target.to_string_lossy().to_string();
            }
        }
        Ok(result)
    }

    async fn respond(&self, ctx: &ActivityContext, task: &ExtractionTask) -> ExtractorResult<ExtractionResult> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            ctx.heartbeat();
            tokio::time::sleep(delay).await;
            ctx.heartbeat();
        }

        if let Some(make) = self.failures.lock().unwrap().get(&task.source) {
            return Err(make());
        }
        {
            let mut transient = self.transient.lock().unwrap();
            if let Some(remaining) = transient.get_mut(&task.source) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(ExtractorError::extraction("scripted transient failure"));
                }
            }
        }

        let result = self
            .results
            .lock()
            .unwrap()
            .get(&task.source)
            .cloned()
            .unwrap_or_else(|| self.default.lock().unwrap().clone());
        Self::materialize(task, result)
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExtractionEngine for ScriptedEngine {
    async fn extract(
        &self,
        ctx: &ActivityContext,
        task: &ExtractionTask,
    ) -> ExtractorResult<ExtractionResult> {
        self.calls.lock().unwrap().push(task.clone());
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        let result = self.respond(ctx, task).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        result
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Mock append-only log with deterministic ids `1-1`, `1-2`, ...
#[derive(Default)]
pub struct MockRelayLog {
    streams: Mutex<HashMap<String, Vec<RelayEntry>>>,
    next_seq: Mutex<u64>,
    appended: Notify,
    appends: AtomicUsize,
    reads: AtomicUsize,
    failing_reads: Mutex<u32>,
    failing_append: Mutex<Option<usize>>,
}

impl MockRelayLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `times` reads fail with a retryable error
    pub fn fail_next_reads(&self, times: u32) {
        *self.failing_reads.lock().unwrap() = times;
    }

    /// After `successes` more appends, the next append fails once with a retryable error
    pub fn fail_append_after(&self, successes: usize) {
        *self.failing_append.lock().unwrap() = Some(successes);
    }

    pub fn entries(&self, key: &RelayKey) -> Vec<RelayEntry> {
        self.streams
            .lock()
            .unwrap()
            .get(key.as_str())
            .cloned()
            .unwrap_or_default()
    }

    pub fn append_count(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }

    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    /// Appends without going through the trait, for test setup
    pub fn push(&self, key: &RelayKey, path: &str, mimetype: &str, checksum: &str) -> EntryId {
        let id = {
            let mut seq = self.next_seq.lock().unwrap();
            *seq += 1;
            EntryId::new(1, *seq)
        };
        self.streams
            .lock()
            .unwrap()
            .entry(key.as_str().to_string())
            .or_default()
            .push(RelayEntry {
                id,
                path: path.to_string(),
                mimetype: mimetype.to_string(),
                checksum: checksum.to_string(),
            });
        self.appends.fetch_add(1, Ordering::SeqCst);
        self.appended.notify_waiters();
        id
    }

    fn after(&self, key: &RelayKey, after: EntryId, count: usize) -> Vec<RelayEntry> {
        self.entries(key)
            .into_iter()
            .filter(|entry| entry.id > after)
            .take(count.max(1))
            .collect()
    }
}

#[async_trait]
impl RelayLog for MockRelayLog {
    async fn append(
        &self,
        key: &RelayKey,
        path: &str,
        mimetype: &str,
        checksum: &str,
    ) -> ExtractorResult<EntryId> {
        {
            let mut failing = self.failing_append.lock().unwrap();
            match *failing {
                Some(0) => {
                    *failing = None;
                    return Err(ExtractorError::relay_log("scripted append failure"));
                }
                Some(remaining) => *failing = Some(remaining - 1),
                None => {}
            }
        }
        Ok(self.push(key, path, mimetype, checksum))
    }

    async fn read(
        &self,
        key: &RelayKey,
        after: EntryId,
        count: usize,
        block: Duration,
    ) -> ExtractorResult<Vec<RelayEntry>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        {
            let mut failing = self.failing_reads.lock().unwrap();
            if *failing > 0 {
                *failing -= 1;
                return Err(ExtractorError::relay_log("scripted read failure"));
            }
        }

        let notified = self.appended.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let entries = self.after(key, after, count);
        if !entries.is_empty() || block.is_zero() {
            return Ok(entries);
        }
        let _ = tokio::time::timeout(block, notified).await;
        Ok(self.after(key, after, count))
    }

    async fn delete(&self, key: &RelayKey) -> ExtractorResult<()> {
        self.streams.lock().unwrap().remove(key.as_str());
        Ok(())
    }
}

/// Mock object store keyed by locator string
#[derive(Default)]
pub struct MockObjectStore {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    failing: Mutex<HashSet<String>>,
    downloads: Mutex<Vec<String>>,
    uploads: Mutex<Vec<String>>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, locator: &str, bytes: &[u8]) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert(locator.to_string(), bytes.to_vec());
        self
    }

    /// Downloads of `locator` always fail with a retryable error
    pub fn with_failing_download(self, locator: &str) -> Self {
        self.failing.lock().unwrap().insert(locator.to_string());
        self
    }

    pub fn object(&self, locator: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(locator).cloned()
    }

    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn download(&self, locator: &ObjectLocator, dest: &Path) -> ExtractorResult<u64> {
        let key = locator.to_string();
        self.downloads.lock().unwrap().push(key.clone());
        if self.failing.lock().unwrap().contains(&key) {
            return Err(ExtractorError::object_store(format!("scripted failure: {key}")));
        }
        let bytes = self
            .objects
            .lock()
            .unwrap()
            .get(&key)
            .cloned()
            .ok_or_else(|| ExtractorError::object_store(format!("no such object: {key}")))?;
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, &bytes).await?;
        Ok(bytes.len() as u64)
    }

    async fn upload(&self, src: &Path, locator: &ObjectLocator) -> ExtractorResult<ObjectLocator> {
        let bytes = tokio::fs::read(src).await?;
        let key = locator.to_string();
        self.objects.lock().unwrap().insert(key.clone(), bytes);
        self.uploads.lock().unwrap().push(key);
        Ok(locator.clone())
    }
}

/// Workspace manager backed by a private temporary directory
///
/// Each run lives in `<base>/<run_id>`.
pub struct MockWorkspaceManager {
    base: TempDir,
    acquired: Mutex<Vec<Workspace>>,
    reopened: Mutex<Vec<Workspace>>,
    released: Mutex<Vec<PathBuf>>,
    release_calls: AtomicUsize,
    fail_acquire: bool,
}

impl MockWorkspaceManager {
    pub fn new() -> Self {
        Self {
            base: tempfile::tempdir().unwrap(),
            acquired: Mutex::new(Vec::new()),
            reopened: Mutex::new(Vec::new()),
            released: Mutex::new(Vec::new()),
            release_calls: AtomicUsize::new(0),
            fail_acquire: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_acquire: true,
            ..Self::new()
        }
    }

    pub fn base_dir(&self) -> &Path {
        self.base.path()
    }

    pub fn acquired(&self) -> Vec<Workspace> {
        self.acquired.lock().unwrap().clone()
    }

    pub fn reopened(&self) -> Vec<Workspace> {
        self.reopened.lock().unwrap().clone()
    }

    fn layout(&self, affinity: &AffinityKey, run_id: &str) -> Workspace {
        let run_dir = self.base.path().join(run_id);
        Workspace {
            root_path: run_dir.join("root"),
            working_dir: run_dir.join("output"),
            affinity_key: affinity.clone(),
        }
    }

    pub fn released(&self) -> Vec<PathBuf> {
        self.released.lock().unwrap().clone()
    }

    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    /// Whether any acquired working directory still exists on disk
    pub fn leaked(&self) -> bool {
        self.acquired
            .lock()
            .unwrap()
            .iter()
            .any(|ws| ws.working_dir.exists() || ws.root_path.exists())
    }
}

impl Default for MockWorkspaceManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl WorkspaceManager for MockWorkspaceManager {
    async fn acquire(&self, affinity: &AffinityKey, run_id: &str) -> ExtractorResult<Workspace> {
        if self.fail_acquire {
            return Err(ExtractorError::workspace("scripted acquire failure"));
        }
        let workspace = self.layout(affinity, run_id);
        let run_dir = self.base.path().join(run_id);
        if run_dir.exists() {
            tokio::fs::remove_dir_all(&run_dir).await?;
        }
        tokio::fs::create_dir_all(&workspace.working_dir).await?;
        self.acquired.lock().unwrap().push(workspace.clone());
        Ok(workspace)
    }

    async fn reopen(
        &self,
        affinity: &AffinityKey,
        run_id: &str,
    ) -> ExtractorResult<Option<Workspace>> {
        let workspace = self.layout(affinity, run_id);
        if !workspace.working_dir.is_dir() {
            return Ok(None);
        }
        self.reopened.lock().unwrap().push(workspace.clone());
        Ok(Some(workspace))
    }

    async fn release(&self, paths: &[PathBuf]) -> ExtractorResult<()> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        for path in paths {
            if path.is_dir() {
                let _ = tokio::fs::remove_dir_all(path).await;
            } else {
                let _ = tokio::fs::remove_file(path).await;
            }
            self.released.lock().unwrap().push(path.clone());
        }
        Ok(())
    }
}
