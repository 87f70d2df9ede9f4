use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{ExtractorError, ExtractorResult};
use crate::models::ObjectLocator;

/// 提取引擎可产出的内容类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// 纯文本
    Text,
    /// 元数据
    Metadata,
    /// 渲染后的 PDF
    Pdf,
    /// 嵌入对象（附件、归档成员等）
    Embedded,
}

impl OutputKind {
    pub fn all() -> Vec<OutputKind> {
        vec![
            OutputKind::Text,
            OutputKind::Metadata,
            OutputKind::Pdf,
            OutputKind::Embedded,
        ]
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputKind::Text => "text",
            OutputKind::Metadata => "metadata",
            OutputKind::Pdf => "pdf",
            OutputKind::Embedded => "embedded",
        };
        f.write_str(name)
    }
}

impl FromStr for OutputKind {
    type Err = ExtractorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(OutputKind::Text),
            "metadata" => Ok(OutputKind::Metadata),
            "pdf" => Ok(OutputKind::Pdf),
            "embedded" => Ok(OutputKind::Embedded),
            other => Err(ExtractorError::config_error(format!(
                "未知的输出类型: {other}"
            ))),
        }
    }
}

/// 处理请求
///
/// 一次顶层作业的输入，在根流水线运行期间不可变。
///
/// # 字段说明
///
/// - `input`: 输入对象定位符
/// - `output`: 打包结果的上传定位符
/// - `mimetype`: MIME 类型提示，空字符串表示由引擎自行识别
/// - `output_kinds`: 需要产出的内容类型
/// - `recurse`: 是否对嵌入对象递归提取
/// - `run_id`: 运行标识；指定后工作区、追加日志和检查点都以它命名，
///   中断的递归运行可以用同一个标识继续
///
/// 定位符以原始字符串保存，由流水线在下载/上传步骤中解析，
/// 这样结构错误会作为对应活动的不可重试失败出现。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub input: String,
    pub output: String,
    #[serde(default)]
    pub mimetype: String,
    #[serde(default = "OutputKind::all")]
    pub output_kinds: Vec<OutputKind>,
    #[serde(default)]
    pub recurse: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

impl ProcessRequest {
    pub fn new<I: Into<String>, O: Into<String>>(input: I, output: O) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            mimetype: String::new(),
            output_kinds: OutputKind::all(),
            recurse: false,
            run_id: None,
        }
    }

    pub fn with_mimetype<S: Into<String>>(mut self, mimetype: S) -> Self {
        self.mimetype = mimetype.into();
        self
    }

    pub fn with_output_kinds(mut self, kinds: Vec<OutputKind>) -> Self {
        self.output_kinds = kinds;
        self
    }

    pub fn with_recurse(mut self, recurse: bool) -> Self {
        self.recurse = recurse;
        self
    }

    pub fn with_run_id<S: Into<String>>(mut self, run_id: S) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// 运行标识只能包含字母、数字、`-`、`_`、`.`，且不能以 `.` 开头
    pub fn validate_run_id(&self) -> ExtractorResult<()> {
        let Some(run_id) = &self.run_id else {
            return Ok(());
        };
        let valid = !run_id.is_empty()
            && run_id.len() <= 128
            && !run_id.starts_with('.')
            && run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(())
        } else {
            Err(ExtractorError::config_error(format!("无效的运行标识: {run_id}")))
        }
    }

    pub fn input_locator(&self) -> ExtractorResult<ObjectLocator> {
        ObjectLocator::parse(&self.input)
    }

    pub fn output_locator(&self) -> ExtractorResult<ObjectLocator> {
        ObjectLocator::parse(&self.output)
    }

    /// 根任务实际请求的输出类型；不递归时不需要切分嵌入对象，递归时必须切分
    pub fn root_output_kinds(&self) -> Vec<OutputKind> {
        let mut kinds: Vec<OutputKind> = self
            .output_kinds
            .iter()
            .copied()
            .filter(|kind| self.recurse || *kind != OutputKind::Embedded)
            .collect();
        if self.recurse {
            kinds.push(OutputKind::Embedded);
        }
        kinds.sort();
        kinds.dedup();
        kinds
    }
}

/// 解析逗号分隔的输出类型列表，如 `text,metadata`
pub fn parse_output_kinds(raw: &str) -> ExtractorResult<Vec<OutputKind>> {
    raw.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(OutputKind::from_str)
        .collect()
}
