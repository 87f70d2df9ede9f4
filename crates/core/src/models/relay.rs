use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::ExtractorError;

/// 追加日志条目 ID，格式与 Redis Stream 一致：`<毫秒>-<序号>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntryId {
    pub millis: u64,
    pub seq: u64,
}

impl EntryId {
    /// 流的起点，任何真实条目都大于它
    pub const START: EntryId = EntryId { millis: 0, seq: 0 };

    pub fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// 同一毫秒内的下一个 ID
    pub fn next(&self) -> Self {
        Self {
            millis: self.millis,
            seq: self.seq + 1,
        }
    }
}

impl Default for EntryId {
    fn default() -> Self {
        Self::START
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = ExtractorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ExtractorError::relay_log(format!("无效的条目ID: {s}"));
        let (millis, seq) = match s.split_once('-') {
            Some((millis, seq)) => (millis, seq),
            None => (s, "0"),
        };
        Ok(Self {
            millis: millis.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

impl TryFrom<String> for EntryId {
    type Error = ExtractorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntryId> for String {
    fn from(id: EntryId) -> Self {
        id.to_string()
    }
}

/// 中继键，关联一次根流水线运行的日志条目与其扩展控制器/中继
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RelayKey(String);

impl RelayKey {
    pub fn new<S: Into<String>>(key: S) -> Self {
        Self(key.into())
    }

    /// 根运行对应的输出流：`<run_id>-output`
    pub fn for_run(run_id: &str) -> Self {
        Self(format!("{run_id}-output"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RelayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 追加日志中的一条发现记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayEntry {
    pub id: EntryId,
    pub path: String,
    pub mimetype: String,
    #[serde(default)]
    pub checksum: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_ordering() {
        let a: EntryId = "1700000000000-0".parse().unwrap();
        let b: EntryId = "1700000000000-1".parse().unwrap();
        let c: EntryId = "1700000000001-0".parse().unwrap();
        assert!(EntryId::START < a);
        assert!(a < b && b < c);
        assert_eq!(a.next(), b);
        assert_eq!(c.to_string(), "1700000000001-0");
    }

    #[test]
    fn test_entry_id_parse_errors() {
        assert!("abc-1".parse::<EntryId>().is_err());
        assert!("1-x".parse::<EntryId>().is_err());
        assert_eq!("42".parse::<EntryId>().unwrap(), EntryId::new(42, 0));
    }

    #[test]
    fn test_relay_key_for_run() {
        assert_eq!(RelayKey::for_run("abc").as_str(), "abc-output");
    }
}
