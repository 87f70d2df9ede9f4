use std::path::{Path, PathBuf};

use async_trait::async_trait;
use extractor_core::models::ObjectLocator;
use extractor_core::traits::ObjectStore;
use extractor_core::{ExtractorError, ExtractorResult};
use tracing::{debug, info};

/// 本地文件系统对象存储
///
/// `scheme://bucket/key` 映射为 `<root>/<bucket>/<key>`。
#[derive(Debug, Clone)]
pub struct LocalObjectStore {
    root: PathBuf,
}

impl LocalObjectStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn object_path(&self, locator: &ObjectLocator) -> ExtractorResult<PathBuf> {
        let mut path = self.root.join(locator.bucket());
        for segment in locator.key().split('/') {
            if segment.is_empty() || segment == "." || segment == ".." {
                return Err(ExtractorError::malformed_locator(locator.to_string()));
            }
            path.push(segment);
        }
        Ok(path)
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn download(&self, locator: &ObjectLocator, dest: &Path) -> ExtractorResult<u64> {
        let source = self.object_path(locator)?;
        if !tokio::fs::try_exists(&source).await? {
            return Err(ExtractorError::object_store(format!("对象不存在: {locator}")));
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = tokio::fs::copy(&source, dest).await?;
        debug!("下载对象 {} -> {} ({} 字节)", locator, dest.display(), bytes);
        Ok(bytes)
    }

    async fn upload(&self, src: &Path, locator: &ObjectLocator) -> ExtractorResult<ObjectLocator> {
        let target = self.object_path(locator)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let bytes = tokio::fs::copy(src, &target).await.map_err(|e| {
            ExtractorError::object_store(format!("上传 {} 失败: {e}", src.display()))
        })?;
        info!("上传对象 {} ({} 字节)", locator, bytes);
        Ok(locator.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extractor_core::ErrorKind;

    #[tokio::test]
    async fn test_upload_then_download() {
        let root = tempfile::tempdir().unwrap();
        let scratch = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(root.path());

        let src = scratch.path().join("report.txt");
        tokio::fs::write(&src, b"hello").await.unwrap();
        let locator = ObjectLocator::parse("object://bucket/nested/report.txt").unwrap();

        let confirmed = store.upload(&src, &locator).await.unwrap();
        assert_eq!(confirmed, locator);
        assert!(root.path().join("bucket/nested/report.txt").exists());

        let dest = scratch.path().join("down/copy.txt");
        let bytes = store.download(&locator, &dest).await.unwrap();
        assert_eq!(bytes, 5);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_download_missing_object_is_retryable() {
        let root = tempfile::tempdir().unwrap();
        let store = LocalObjectStore::new(root.path());
        let locator = ObjectLocator::parse("object://bucket/missing.zip").unwrap();
        let err = store
            .download(&locator, &root.path().join("x"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ObjectStore);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_path_traversal_rejected() {
        let store = LocalObjectStore::new("/data");
        let locator = ObjectLocator::parse("object://bucket/a/../../etc/passwd").unwrap();
        // url 解析会规范化 `..`，结果不能逃出 bucket 目录
        match store.object_path(&locator) {
            Ok(path) => assert!(path.starts_with("/data/bucket")),
            Err(err) => assert_eq!(err.kind(), ErrorKind::MalformedLocator),
        }
    }
}
