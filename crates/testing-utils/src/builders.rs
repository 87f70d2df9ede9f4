//! Test data builders for creating test entities
//!
//! Sensible defaults with `with_*` overrides.

use std::path::PathBuf;

use extractor_core::models::{
    ArtifactRef, EntryId, ExtractionResult, ExtractionTask, OutputKind, RelayEntry, RelayKey,
};

/// Builder for creating test ExtractionTask entities
pub struct TaskBuilder {
    task: ExtractionTask,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: ExtractionTask {
                source: PathBuf::from("/tmp/extractor-test/input.bin"),
                target_dir: PathBuf::from("/tmp/extractor-test/output"),
                mimetype: String::new(),
                output_kinds: vec![OutputKind::Text, OutputKind::Metadata],
                relay_key: None,
            },
        }
    }

    pub fn with_source<P: Into<PathBuf>>(mut self, source: P) -> Self {
        self.task.source = source.into();
        self
    }

    pub fn with_target_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.task.target_dir = dir.into();
        self
    }

    pub fn with_mimetype(mut self, mimetype: &str) -> Self {
        self.task.mimetype = mimetype.to_string();
        self
    }

    pub fn with_relay_key(mut self, key: &RelayKey) -> Self {
        self.task.relay_key = Some(key.clone());
        self
    }

    pub fn build(self) -> ExtractionTask {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for creating scripted engine results
#[derive(Default)]
pub struct ResultBuilder {
    result: ExtractionResult,
}

impl ResultBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Relative paths are materialised inside the task's target directory
    pub fn produced(mut self, path: &str, mimetype: &str) -> Self {
        self.result.produced.push(ArtifactRef::new(path, mimetype));
        self
    }

    pub fn embedded(mut self, path: &str, mimetype: &str) -> Self {
        self.result.embedded.push(ArtifactRef::new(path, mimetype));
        self
    }

    pub fn embedded_with_checksum(mut self, path: &str, mimetype: &str, checksum: &str) -> Self {
        self.result
            .embedded
            .push(ArtifactRef::new(path, mimetype).with_checksum(checksum));
        self
    }

    /// The engine reports that it appended entries itself, up to `id`
    pub fn appended_through(mut self, id: EntryId) -> Self {
        self.result.appended_through = Some(id);
        self
    }

    pub fn build(self) -> ExtractionResult {
        self.result
    }
}

/// Relay entry with id `millis-seq`
pub fn relay_entry(millis: u64, seq: u64, path: &str) -> RelayEntry {
    RelayEntry {
        id: EntryId::new(millis, seq),
        path: path.to_string(),
        mimetype: "application/octet-stream".to_string(),
        checksum: format!("sum-{millis}-{seq}"),
    }
}
