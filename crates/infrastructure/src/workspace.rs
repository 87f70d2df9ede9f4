use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use extractor_core::models::{target_dir_in, AffinityKey, Workspace};
use extractor_core::traits::WorkspaceManager;
use extractor_core::{ExtractorError, ExtractorResult};
use tracing::{debug, info, warn};

/// 本地工作区管理
///
/// 每次运行在 `base_dir` 下创建以运行标识命名的目录，内含根文件槽和工作目录。
/// 目录先在临时位置建好再改名，半成品不会被 `reopen` 当作可用的工作区。
/// 释放时只删除 `base_dir` 之内的路径。
#[derive(Debug, Clone)]
pub struct LocalWorkspaceManager {
    base_dir: PathBuf,
}

impl LocalWorkspaceManager {
    pub fn new<P: Into<PathBuf>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn workspace(run_dir: &Path, affinity: &AffinityKey) -> Workspace {
        Workspace {
            root_path: run_dir.join("root"),
            working_dir: run_dir.join("output"),
            affinity_key: affinity.clone(),
        }
    }

    fn is_managed(&self, path: &Path) -> bool {
        path.starts_with(&self.base_dir)
            && path != self.base_dir
            && !path.components().any(|c| matches!(c, Component::ParentDir))
    }
}

#[async_trait]
impl WorkspaceManager for LocalWorkspaceManager {
    async fn acquire(&self, affinity: &AffinityKey, run_id: &str) -> ExtractorResult<Workspace> {
        let base_dir = self.base_dir.clone();
        let run_dir = target_dir_in(&self.base_dir, run_id);
        let target = run_dir.clone();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            std::fs::create_dir_all(&base_dir)?;
            if target.exists() {
                std::fs::remove_dir_all(&target)?;
            }
            let staging = tempfile::Builder::new()
                .prefix(".staging-")
                .tempdir_in(&base_dir)?;
            std::fs::create_dir(staging.path().join("output"))?;
            let staged = staging.keep();
            std::fs::rename(&staged, &target).inspect_err(|_| {
                let _ = std::fs::remove_dir_all(&staged);
            })
        })
        .await
        .map_err(|e| ExtractorError::workspace(format!("创建工作区任务失败: {e}")))?
        .map_err(|e| ExtractorError::workspace(format!("无法创建工作区: {e}")))?;

        let workspace = Self::workspace(&run_dir, affinity);
        info!(
            "创建工作区 {} (节点 {})",
            run_dir.display(),
            workspace.affinity_key
        );
        Ok(workspace)
    }

    async fn reopen(
        &self,
        affinity: &AffinityKey,
        run_id: &str,
    ) -> ExtractorResult<Option<Workspace>> {
        let run_dir = target_dir_in(&self.base_dir, run_id);
        let workspace = Self::workspace(&run_dir, affinity);
        match tokio::fs::metadata(&workspace.working_dir).await {
            Ok(meta) if meta.is_dir() => {
                info!("重新打开工作区 {}", run_dir.display());
                Ok(Some(workspace))
            }
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ExtractorError::workspace(format!("无法打开工作区: {e}"))),
        }
    }

    async fn release(&self, paths: &[PathBuf]) -> ExtractorResult<()> {
        let mut parents = BTreeSet::new();
        let mut failures = Vec::new();

        for path in paths {
            if !self.is_managed(path) {
                warn!("拒绝删除工作区之外的路径: {}", path.display());
                continue;
            }
            let result = match tokio::fs::symlink_metadata(path).await {
                Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
                Ok(_) => tokio::fs::remove_file(path).await,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => debug!("已删除 {}", path.display()),
                Err(e) => failures.push(format!("{}: {e}", path.display())),
            }
            if let Some(parent) = path.parent() {
                if self.is_managed(parent) {
                    parents.insert(parent.to_path_buf());
                }
            }
        }

        // 运行目录清空后一并删除
        for parent in parents {
            if let Ok(mut entries) = tokio::fs::read_dir(&parent).await {
                if matches!(entries.next_entry().await, Ok(None)) {
                    let _ = tokio::fs::remove_dir(&parent).await;
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ExtractorError::workspace(format!(
                "部分路径删除失败: {}",
                failures.join("; ")
            )))
        }
    }
}
