use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models::{EntryId, OutputKind, RelayKey};

/// 提取任务
///
/// 根文件或发现的嵌入对象各对应一个任务，由任务执行器消费一次。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionTask {
    /// 待提取的源文件
    pub source: PathBuf,
    /// 产物输出目录
    pub target_dir: PathBuf,
    pub mimetype: String,
    pub output_kinds: Vec<OutputKind>,
    /// 设置后，发现的嵌入对象写入该追加日志而非内联返回
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relay_key: Option<RelayKey>,
}

/// 单个产物或发现文件的引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: String,
    #[serde(default)]
    pub mimetype: String,
    /// 内容校验和，用于去重
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl ArtifactRef {
    pub fn new<P: Into<String>, M: Into<String>>(path: P, mimetype: M) -> Self {
        Self {
            path: path.into(),
            mimetype: mimetype.into(),
            checksum: None,
        }
    }

    pub fn with_checksum<S: Into<String>>(mut self, checksum: S) -> Self {
        self.checksum = Some(checksum.into());
        self
    }
}

/// 提取引擎的原始输出
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    #[serde(default)]
    pub produced: Vec<ArtifactRef>,
    #[serde(default)]
    pub embedded: Vec<ArtifactRef>,
    /// 引擎自行写入追加日志的最大条目 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appended_through: Option<EntryId>,
}

/// 任务执行器规范化后的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub produced: Vec<ArtifactRef>,
    /// 未写入追加日志的嵌入对象（未提供中继键时）
    pub embedded: Vec<ArtifactRef>,
    /// 本任务写入追加日志的最大条目 ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub appended_through: Option<EntryId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_result_reports_own_appends() {
        let result: ExtractionResult = serde_json::from_str(
            r#"{"produced":[{"path":"/w/body.txt","mimetype":"text/plain"}],
                "appended_through":"1700000000000-4"}"#,
        )
        .unwrap();
        assert_eq!(result.produced.len(), 1);
        assert!(result.embedded.is_empty());
        assert_eq!(result.appended_through, Some(EntryId::new(1_700_000_000_000, 4)));

        let plain: ExtractionResult = serde_json::from_str(r#"{"produced":[]}"#).unwrap();
        assert!(plain.appended_through.is_none());
    }
}
