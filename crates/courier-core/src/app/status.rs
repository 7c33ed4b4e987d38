//! Status - ラベルごとの状態別件数

use serde::{Deserialize, Serialize};

use crate::domain::{JobRecord, JobStatus};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub ready: usize,
    pub running: usize,
    pub succeeded: usize,
    pub permanently_failed: usize,
    pub obsolete: usize,
}

impl QueueCounts {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a JobRecord>) -> Self {
        let mut counts = QueueCounts::default();
        for record in records {
            match record.status {
                JobStatus::Ready => counts.ready += 1,
                JobStatus::Running => counts.running += 1,
                JobStatus::Succeeded => counts.succeeded += 1,
                JobStatus::PermanentlyFailed => counts.permanently_failed += 1,
                JobStatus::Obsolete => counts.obsolete += 1,
            }
        }
        counts
    }

    /// Records that still have work ahead of them.
    pub fn pending(&self) -> usize {
        self.ready + self.running
    }

    /// Terminal records still kept in the store.
    pub fn finished(&self) -> usize {
        self.succeeded + self.permanently_failed + self.obsolete
    }
}
