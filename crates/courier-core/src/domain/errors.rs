//! Errors - エラー型と分類
//!
//! - `JobError`: 作業関数が返すエラー。ErrorKind で運用分類する
//! - `QueueError`: キュー自体の操作エラー（不正な遷移、ストア、設定）

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::{JobId, JobStatus};
use crate::ports::StoreError;

/// Classification of a work failure.
///
/// - Retryable: transient (network, server busy). Subject to backoff and the retry ceiling.
/// - Permanent: retrying cannot help. Terminal immediately.
/// - Obsolete: the job's target no longer exists. Terminal, no hooks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Retryable,
    Permanent,
    Obsolete,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Retryable => "retryable",
            ErrorKind::Permanent => "permanent",
            ErrorKind::Obsolete => "obsolete",
        };
        f.write_str(s)
    }
}

/// Error reported by a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind} error: {message}")]
pub struct JobError {
    kind: ErrorKind,
    message: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Retryable, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    pub fn obsolete(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Obsolete, message)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Retryable
    }
}

/// Errors surfaced by the engine's public API.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("illegal transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_retryable_kind_is_retryable() {
        assert!(JobError::retryable("timeout").is_retryable());
        assert!(!JobError::permanent("bad request").is_retryable());
        assert!(!JobError::obsolete("thread deleted").is_retryable());
    }

    #[test]
    fn display_includes_kind_and_message() {
        let err = JobError::permanent("recipient unknown");
        assert_eq!(err.to_string(), "permanent error: recipient unknown");
    }
}
