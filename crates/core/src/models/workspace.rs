use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// 工作节点亲和性键
///
/// 工作区是节点本地、不复制的状态，所有读写它的活动都必须携带同一个键。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AffinityKey(String);

impl AffinityKey {
    pub fn new<S: Into<String>>(key: S) -> Self {
        Self(key.into())
    }

    /// 使用本机主机名作为亲和性键
    pub fn local() -> Self {
        let name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AffinityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 工作区
///
/// - `root_path`: 根输入文件的存放位置
/// - `working_dir`: 提取产物目录，打包时整体归档
/// - `affinity_key`: 创建该工作区的节点
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub root_path: PathBuf,
    pub working_dir: PathBuf,
    pub affinity_key: AffinityKey,
}

impl Workspace {
    /// 打包产物的路径，位于工作目录之外，避免归档包含自身
    pub fn archive_path(&self) -> PathBuf {
        let mut name = self
            .working_dir
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "output".into());
        name.push(".zip");
        match self.working_dir.parent() {
            Some(parent) => parent.join(name),
            None => PathBuf::from(name),
        }
    }

    /// 发现任务的目标目录
    pub fn target_dir_for(&self, name: &str) -> PathBuf {
        target_dir_in(&self.working_dir, name)
    }

    pub fn contains(&self, path: &Path) -> bool {
        path.starts_with(&self.working_dir)
    }
}

/// `working_dir` 下以 `name` 命名的子目录，`name` 中的路径分隔符会被替换
pub fn target_dir_in(working_dir: &Path, name: &str) -> PathBuf {
    working_dir.join(sanitize_component(name))
}

fn sanitize_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
