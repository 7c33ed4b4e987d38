//! Events - エンジンが broadcast するライフサイクルイベント

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{JobId, JobStatus};

/// One observable step in a job's life.
///
/// Events are emitted after the corresponding transaction commits, so a
/// subscriber never sees a status the store has not durably recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum JobEvent {
    /// Startup recovery re-marked the record Ready (`previous` is its status before recovery).
    Recovered { id: JobId, previous: JobStatus },

    Dispatched { id: JobId, key: Option<String> },

    RetryScheduled {
        id: JobId,
        failure_count: u32,
        delay: Duration,
    },

    Succeeded { id: JobId },

    PermanentlyFailed { id: JobId, error: String },

    Obsolete { id: JobId, reason: String },
}

impl JobEvent {
    pub fn id(&self) -> JobId {
        match self {
            JobEvent::Recovered { id, .. }
            | JobEvent::Dispatched { id, .. }
            | JobEvent::RetryScheduled { id, .. }
            | JobEvent::Succeeded { id }
            | JobEvent::PermanentlyFailed { id, .. }
            | JobEvent::Obsolete { id, .. } => *id,
        }
    }

    /// True for events that end a job's life.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::Succeeded { .. }
                | JobEvent::PermanentlyFailed { .. }
                | JobEvent::Obsolete { .. }
        )
    }
}
