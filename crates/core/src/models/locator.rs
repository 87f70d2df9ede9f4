use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::{ExtractorError, ExtractorResult};

const SUPPORTED_SCHEMES: [&str; 2] = ["object", "s3"];

/// 对象存储定位符，形如 `object://bucket/key` 或 `s3://bucket/key`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ObjectLocator {
    scheme: String,
    bucket: String,
    key: String,
}

impl ObjectLocator {
    /// 解析定位符，任何结构性问题都返回不可重试的 `MalformedLocator`
    pub fn parse(raw: &str) -> ExtractorResult<Self> {
        let url = Url::parse(raw).map_err(|_| ExtractorError::malformed_locator(raw))?;

        if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
            return Err(ExtractorError::malformed_locator(raw));
        }

        let bucket = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(ExtractorError::malformed_locator(raw)),
        };

        let key = url.path().trim_start_matches('/').to_string();
        if key.is_empty() || key.ends_with('/') {
            return Err(ExtractorError::malformed_locator(raw));
        }

        Ok(Self {
            scheme: url.scheme().to_string(),
            bucket,
            key,
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// key 的最后一段
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

impl fmt::Display for ObjectLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}/{}", self.scheme, self.bucket, self.key)
    }
}

impl FromStr for ObjectLocator {
    type Err = ExtractorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ObjectLocator {
    type Error = ExtractorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ObjectLocator> for String {
    fn from(locator: ObjectLocator) -> Self {
        locator.to_string()
    }
}
