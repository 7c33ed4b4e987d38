//! JobStatus - ジョブの状態遷移

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a job record.
///
/// State transitions:
/// - Ready -> Running -> Succeeded
/// - Ready -> Running -> Ready (retryable failure, loop until the retry ceiling)
/// - Ready -> Running -> PermanentlyFailed
/// - Ready -> Obsolete (target no longer resolves before dispatch)
/// - Running -> Obsolete (target vanished mid-flight)
/// - Running -> Ready (startup recovery of an interrupted attempt)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Eligible for dispatch.
    Ready,

    /// Dispatched to a lane; exactly one execution in flight.
    Running,

    Succeeded,

    /// Permanent error, or retry budget exhausted.
    PermanentlyFailed,

    /// Payload no longer resolves to a valid target.
    Obsolete,
}

impl JobStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::PermanentlyFailed | JobStatus::Obsolete
        )
    }

    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Ready, Running)
                | (Ready, Obsolete)
                | (Running, Succeeded)
                | (Running, Ready)
                | (Running, PermanentlyFailed)
                | (Running, Obsolete)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Ready => "ready",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::PermanentlyFailed => "permanently_failed",
            JobStatus::Obsolete => "obsolete",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::succeeded(JobStatus::Succeeded)]
    #[case::permanently_failed(JobStatus::PermanentlyFailed)]
    #[case::obsolete(JobStatus::Obsolete)]
    fn terminal_states_have_no_exits(#[case] terminal: JobStatus) {
        assert!(terminal.is_terminal());
        for next in [
            JobStatus::Ready,
            JobStatus::Running,
            JobStatus::Succeeded,
            JobStatus::PermanentlyFailed,
            JobStatus::Obsolete,
        ] {
            assert!(!terminal.can_transition_to(next), "{terminal} -> {next}");
        }
    }

    #[rstest]
    // Running を経由しない遷移は不可
    #[case(JobStatus::Ready, JobStatus::Succeeded)]
    #[case(JobStatus::Ready, JobStatus::PermanentlyFailed)]
    #[case(JobStatus::Ready, JobStatus::Ready)]
    #[case(JobStatus::Running, JobStatus::Running)]
    fn rejects_shortcuts(#[case] from: JobStatus, #[case] to: JobStatus) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn serializes_as_snake_case() {
        let json = serde_json::to_string(&JobStatus::PermanentlyFailed).unwrap();
        assert_eq!(json, "\"permanently_failed\"");
    }
}
