use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use extractor_core::traits::CheckpointStore;
use extractor_core::{ExtractorError, ExtractorResult};
use tokio::sync::RwLock;
use tracing::debug;

/// 内存检查点存储
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, serde_json::Value>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.checkpoints.read().await.len()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, instance_id: &str, checkpoint: serde_json::Value) -> ExtractorResult<()> {
        self.checkpoints
            .write()
            .await
            .insert(instance_id.to_string(), checkpoint);
        Ok(())
    }

    async fn load(&self, instance_id: &str) -> ExtractorResult<Option<serde_json::Value>> {
        Ok(self.checkpoints.read().await.get(instance_id).cloned())
    }

    async fn clear(&self, instance_id: &str) -> ExtractorResult<()> {
        self.checkpoints.write().await.remove(instance_id);
        Ok(())
    }
}

/// 文件检查点存储，每个实例一个 JSON 文件
///
/// 先写临时文件再重命名，保证读到的检查点总是完整的。
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, instance_id: &str) -> ExtractorResult<PathBuf> {
        if instance_id.is_empty()
            || instance_id
                .chars()
                .any(|c| !(c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'))
            || instance_id.starts_with('.')
        {
            return Err(ExtractorError::Internal(format!(
                "无效的实例ID: {instance_id}"
            )));
        }
        Ok(self.dir.join(format!("{instance_id}.json")))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn save(&self, instance_id: &str, checkpoint: serde_json::Value) -> ExtractorResult<()> {
        let path = self.path_for(instance_id)?;
        tokio::fs::create_dir_all(&self.dir).await?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(&checkpoint)?).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!("保存检查点 {}", path.display());
        Ok(())
    }

    async fn load(&self, instance_id: &str) -> ExtractorResult<Option<serde_json::Value>> {
        let path = self.path_for(instance_id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self, instance_id: &str) -> ExtractorResult<()> {
        let path = self.path_for(instance_id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
