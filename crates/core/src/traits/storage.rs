use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::errors::ExtractorResult;
use crate::models::{AffinityKey, ObjectLocator, Workspace};

/// 对象存储
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// 下载对象到 `dest`，返回写入的字节数
    async fn download(&self, locator: &ObjectLocator, dest: &Path) -> ExtractorResult<u64>;

    /// 上传本地文件，返回确认后的定位符
    async fn upload(&self, src: &Path, locator: &ObjectLocator) -> ExtractorResult<ObjectLocator>;
}

/// 工作区管理
#[async_trait]
pub trait WorkspaceManager: Send + Sync {
    /// 在当前节点上为 `run_id` 创建私有工作区，同名的残留目录先被清除
    async fn acquire(&self, affinity: &AffinityKey, run_id: &str) -> ExtractorResult<Workspace>;

    /// 重新打开中断的运行留下的工作区，不存在时返回 `None`
    async fn reopen(
        &self,
        affinity: &AffinityKey,
        run_id: &str,
    ) -> ExtractorResult<Option<Workspace>>;

    /// 尽力删除给定路径，不存在的路径被忽略
    async fn release(&self, paths: &[PathBuf]) -> ExtractorResult<()>;
}

/// 目录打包
#[async_trait]
pub trait Archiver: Send + Sync {
    /// 将 `dir` 下的所有文件打包到 `dest`，返回归档路径
    async fn package(&self, dir: &Path, dest: &Path) -> ExtractorResult<PathBuf>;

    /// 将给定文件打包到 `dest`，归档内使用文件名
    async fn package_files(&self, files: &[PathBuf], dest: &Path) -> ExtractorResult<PathBuf>;
}
