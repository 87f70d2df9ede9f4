use std::collections::HashSet;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use extractor_core::traits::Archiver;
use extractor_core::{ExtractorError, ExtractorResult};
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// zip 打包
#[derive(Debug, Clone, Default)]
pub struct ZipArchiver;

impl ZipArchiver {
    pub fn new() -> Self {
        Self
    }
}

fn packaging_error(e: impl std::fmt::Display) -> ExtractorError {
    ExtractorError::Packaging(e.to_string())
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> io::Result<()> {
    let mut entries: Vec<_> = std::fs::read_dir(dir)?.collect::<io::Result<_>>()?;
    entries.sort_by_key(|entry| entry.file_name());
    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect_files(&path, out)?;
        } else if file_type.is_file() {
            out.push(path);
        }
    }
    Ok(())
}

fn archive_name(base: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn write_archive(dest: &Path, files: &[(String, PathBuf)]) -> ExtractorResult<()> {
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut zip = ZipWriter::new(File::create(dest)?);
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    for (name, path) in files {
        zip.start_file(name.as_str(), options).map_err(packaging_error)?;
        let mut source = File::open(path)?;
        io::copy(&mut source, &mut zip)?;
    }
    zip.finish().map_err(packaging_error)?;
    Ok(())
}

#[async_trait]
impl Archiver for ZipArchiver {
    async fn package(&self, dir: &Path, dest: &Path) -> ExtractorResult<PathBuf> {
        if dest.starts_with(dir) {
            return Err(ExtractorError::Packaging(format!(
                "归档路径 {} 不能位于被打包目录内",
                dest.display()
            )));
        }
        let dir = dir.to_path_buf();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || -> ExtractorResult<PathBuf> {
            let mut paths = Vec::new();
            collect_files(&dir, &mut paths)?;
            let files: Vec<(String, PathBuf)> = paths
                .into_iter()
                .map(|path| (archive_name(&dir, &path), path))
                .collect();
            write_archive(&dest, &files)?;
            info!("打包 {} 个文件到 {}", files.len(), dest.display());
            Ok(dest)
        })
        .await
        .map_err(packaging_error)?
    }

    async fn package_files(&self, files: &[PathBuf], dest: &Path) -> ExtractorResult<PathBuf> {
        let files = files.to_vec();
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || -> ExtractorResult<PathBuf> {
            let mut seen = HashSet::new();
            let mut named = Vec::with_capacity(files.len());
            for path in files {
                let base = path
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_else(|| "file".to_string());
                let mut name = base.clone();
                let mut suffix = 1;
                while !seen.insert(name.clone()) {
                    name = format!("{suffix}-{base}");
                    suffix += 1;
                }
                named.push((name, path));
            }
            write_archive(&dest, &named)?;
            info!("打包 {} 个文件到 {}", named.len(), dest.display());
            Ok(dest)
        })
        .await
        .map_err(packaging_error)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn names(archive: &Path) -> Vec<String> {
        let mut zip = zip::ZipArchive::new(File::open(archive).unwrap()).unwrap();
        let mut names: Vec<String> = (0..zip.len())
            .map(|i| zip.by_index(i).unwrap().name().to_string())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn test_package_directory_recursively() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("output");
        std::fs::create_dir_all(dir.join("abc")).unwrap();
        std::fs::write(dir.join("root.txt"), b"root").unwrap();
        std::fs::write(dir.join("abc/child.txt"), b"child").unwrap();

        let dest = tmp.path().join("output.zip");
        let archive = ZipArchiver::new().package(&dir, &dest).await.unwrap();
        assert_eq!(names(&archive), vec!["abc/child.txt", "root.txt"]);

        let mut zip = zip::ZipArchive::new(File::open(&archive).unwrap()).unwrap();
        let mut content = String::new();
        zip.by_name("abc/child.txt")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "child");
    }

    #[tokio::test]
    async fn test_package_empty_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("empty");
        std::fs::create_dir_all(&dir).unwrap();
        let archive = ZipArchiver::new()
            .package(&dir, &tmp.path().join("empty.zip"))
            .await
            .unwrap();
        assert!(names(&archive).is_empty());
    }

    #[tokio::test]
    async fn test_archive_inside_source_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let err = ZipArchiver::new()
            .package(tmp.path(), &tmp.path().join("self.zip"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractorError::Packaging(_)));
    }

    #[tokio::test]
    async fn test_package_files_deduplicates_names() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("a")).unwrap();
        std::fs::create_dir_all(tmp.path().join("b")).unwrap();
        let first = tmp.path().join("a/doc.txt");
        let second = tmp.path().join("b/doc.txt");
        std::fs::write(&first, b"1").unwrap();
        std::fs::write(&second, b"2").unwrap();

        let archive = ZipArchiver::new()
            .package_files(&[first, second], &tmp.path().join("out/files.zip"))
            .await
            .unwrap();
        assert_eq!(names(&archive), vec!["1-doc.txt", "doc.txt"]);
    }
}
