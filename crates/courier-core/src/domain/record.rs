//! JobRecord - 永続化される 1 単位の作業
//!
//! # 学習ポイント
//! - 状態遷移は必ず `transition` を通す（不正な遷移は QueueError）
//! - `retry_at` でバックオフ中のレコードを表現し、再起動後も待ち時間を守る

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::{JobError, JobId, JobStatus, QueueError};

/// Persisted job record.
///
/// Design:
/// - This is the single source of truth for a job's state; the engine keeps no
///   shadow copy beyond the snapshot handed to the running operation.
/// - All state transitions happen through the methods below, which check the
///   transition table in [`JobStatus::can_transition_to`].
/// - `failure_count` only grows, and only on `Running -> Ready`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,

    /// Routes the record to the engine that owns this queue on recovery.
    pub label: String,

    /// Records sharing a key run serially. `None` means the default lane.
    pub key: Option<String>,

    pub status: JobStatus,

    pub failure_count: u32,

    /// Collaborator-defined data needed to rebuild the unit of work.
    pub payload: serde_json::Value,

    /// Delete the record instead of keeping it once it reaches a terminal status.
    #[serde(default)]
    pub remove_after_terminal: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// バックオフ中の Ready レコードが次に実行できる時刻。`None` なら即時。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(id: JobId, label: impl Into<String>, job: NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id,
            label: label.into(),
            key: job.key.filter(|k| !k.is_empty()),
            status: JobStatus::Ready,
            failure_count: 0,
            payload: job.payload,
            remove_after_terminal: job.remove_after_terminal,
            last_error: None,
            retry_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn transition(&mut self, next: JobStatus, now: DateTime<Utc>) -> Result<(), QueueError> {
        if !self.status.can_transition_to(next) {
            return Err(QueueError::InvalidTransition {
                id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Ready -> Running.
    pub fn start(&mut self, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.transition(JobStatus::Running, now)?;
        self.retry_at = None;
        Ok(())
    }

    /// 次の試行を `updated_at + delay` まで遅らせる。
    pub fn defer(&mut self, delay: Duration) {
        let at = TimeDelta::from_std(delay)
            .ok()
            .and_then(|d| self.updated_at.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.retry_at = Some(at);
    }

    /// `retry_at` を過ぎていれば true。まだなら残り時間を返す。
    pub fn remaining_backoff(&self, now: DateTime<Utc>) -> Option<Duration> {
        let at = self.retry_at?;
        if at <= now {
            return None;
        }
        (at - now).to_std().ok()
    }

    /// Running -> Succeeded.
    pub fn mark_succeeded(&mut self, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.transition(JobStatus::Succeeded, now)
    }

    /// Running -> Ready, counting the failure.
    pub fn record_retryable_failure(
        &mut self,
        error: &JobError,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.transition(JobStatus::Ready, now)?;
        self.failure_count = self.failure_count.saturating_add(1);
        self.last_error = Some(error.message().to_string());
        Ok(())
    }

    /// Running -> PermanentlyFailed.
    pub fn mark_permanently_failed(
        &mut self,
        error: &JobError,
        now: DateTime<Utc>,
    ) -> Result<(), QueueError> {
        self.transition(JobStatus::PermanentlyFailed, now)?;
        self.last_error = Some(error.message().to_string());
        Ok(())
    }

    /// Ready | Running -> Obsolete.
    pub fn mark_obsolete(&mut self, reason: &str, now: DateTime<Utc>) -> Result<(), QueueError> {
        self.transition(JobStatus::Obsolete, now)?;
        self.last_error = Some(reason.to_string());
        Ok(())
    }

    /// Force a recovered record back to Ready.
    ///
    /// A record found Running at startup was interrupted mid-flight. The
    /// failure count is left untouched: an interruption is not a failure.
    pub fn reset_for_recovery(&mut self, now: DateTime<Utc>) -> Result<(), QueueError> {
        match self.status {
            JobStatus::Ready => Ok(()),
            JobStatus::Running => self.transition(JobStatus::Ready, now),
            other => Err(QueueError::InvalidTransition {
                id: self.id,
                from: other,
                to: JobStatus::Ready,
            }),
        }
    }
}

/// Request to create a job, handed to `JobQueueEngine::enqueue`.
#[derive(Debug, Clone, PartialEq)]
pub struct NewJob {
    pub payload: serde_json::Value,
    pub key: Option<String>,
    pub remove_after_terminal: bool,
}

impl NewJob {
    pub fn new(payload: serde_json::Value) -> Self {
        Self {
            payload,
            key: None,
            remove_after_terminal: false,
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn remove_after_terminal(mut self, remove: bool) -> Self {
        self.remove_after_terminal = remove;
        self
    }
}
