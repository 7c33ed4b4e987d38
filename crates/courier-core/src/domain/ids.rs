//! Job identifiers.
//!
//! # ULID ベースの ID
//! - **時刻でソート可能**: 生成順にソートできる
//! - **協調不要**: 複数プロセスで衝突せずに生成できる
//!
//! 表示とストアのキーには `job-<ULID>` を使います。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

const PREFIX: &str = "job-";

/// Identifier of one job record. Immutable for the record's lifetime.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(Ulid);

impl JobId {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.0
    }
}

impl From<Ulid> for JobId {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{PREFIX}{}", self.0)
    }
}

/// Error returned when a string is not a `job-<ULID>` identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid job id: {0:?}")]
pub struct ParseJobIdError(String);

impl FromStr for JobId {
    type Err = ParseJobIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| ParseJobIdError(s.to_string()))?;
        Ulid::from_string(raw)
            .map(Self)
            .map_err(|_| ParseJobIdError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_job_prefix() {
        let id = JobId::from_ulid(Ulid::new());
        assert!(id.to_string().starts_with("job-"));
    }

    #[test]
    fn parses_its_own_display_form() {
        let id = JobId::from_ulid(Ulid::new());
        let parsed: JobId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn rejects_foreign_strings() {
        assert!("task-01ARZ3NDEKTSV4RRFFQ69G5FAV".parse::<JobId>().is_err());
        assert!("job-not-a-ulid".parse::<JobId>().is_err());
    }

    #[test]
    fn ids_sort_by_ulid() {
        let a = JobId::from_ulid(Ulid::from_parts(1, 0));
        let b = JobId::from_ulid(Ulid::from_parts(2, 0));
        assert!(a < b);
    }
}
