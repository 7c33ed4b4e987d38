//! Decision - 1 回の試行のあとジョブをどうするか
//!
//! # 学習ポイント
//! - Outcome（JobError の有無）から次のアクションを決める純粋関数
//! - 副作用（永続化・フック呼び出し）はエンジン側に任せる

use std::time::Duration;

use super::{ErrorKind, JobError, JobRecord, RetryPolicy};

/// The next action to take for a job whose attempt just finished.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Succeed,

    /// Back to Ready, re-dispatch after `delay`.
    Retry { delay: Duration, error: JobError },

    /// Terminal failure; the terminal-failure hook runs.
    Fail { error: JobError },

    /// Target vanished; terminal without hooks.
    Obsolete { error: JobError },
}

/// Decides retries from the attempt result and the record's failure history.
///
/// Deciders are pure functions: given the current record and result, they
/// return the next action without side effects. Persisting the decision is
/// the engine's job.
#[derive(Debug, Clone)]
pub struct RetryDecider {
    policy: RetryPolicy,
}

impl RetryDecider {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// # Arguments
    /// * `record` - snapshot taken at dispatch (its `failure_count` is pre-attempt)
    /// * `result` - what the work function returned
    /// * `retryable` - the collaborator's classification of the error
    pub fn decide(
        &self,
        record: &JobRecord,
        result: Result<(), JobError>,
        retryable: bool,
    ) -> Decision {
        let error = match result {
            Ok(()) => return Decision::Succeed,
            Err(error) => error,
        };

        if error.kind() == ErrorKind::Obsolete {
            return Decision::Obsolete { error };
        }
        if !retryable || self.policy.is_exhausted(record.failure_count) {
            return Decision::Fail { error };
        }

        let delay = self.policy.next_delay(record.failure_count + 1);
        Decision::Retry { delay, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{JobId, NewJob};
    use chrono::Utc;
    use ulid::Ulid;

    fn record_with_failures(failure_count: u32) -> JobRecord {
        let mut r = JobRecord::new(
            JobId::from_ulid(Ulid::new()),
            "messages",
            NewJob::new(serde_json::Value::Null),
            Utc::now(),
        );
        r.failure_count = failure_count;
        r
    }

    #[test]
    fn success_is_final() {
        let decider = RetryDecider::new(RetryPolicy::default());
        let d = decider.decide(&record_with_failures(3), Ok(()), false);
        assert_eq!(d, Decision::Succeed);
    }

    #[test]
    fn retryable_error_schedules_retry_with_backoff() {
        let policy = RetryPolicy::default();
        let decider = RetryDecider::new(policy.clone());
        let d = decider.decide(
            &record_with_failures(2),
            Err(JobError::retryable("503")),
            true,
        );
        match d {
            Decision::Retry { delay, .. } => assert_eq!(delay, policy.next_delay(3)),
            other => panic!("expected retry, got {other:?}"),
        }
    }

    #[test]
    fn permanent_classification_fails_immediately() {
        let decider = RetryDecider::new(RetryPolicy::default());
        let d = decider.decide(
            &record_with_failures(0),
            Err(JobError::retryable("looks transient")),
            false,
        );
        assert!(matches!(d, Decision::Fail { .. }));
    }

    #[test]
    fn exhausted_budget_turns_retryable_into_failure() {
        let decider = RetryDecider::new(RetryPolicy::default());
        let last_retry = decider.decide(
            &record_with_failures(9),
            Err(JobError::retryable("timeout")),
            true,
        );
        assert!(matches!(last_retry, Decision::Retry { .. }));

        let exhausted = decider.decide(
            &record_with_failures(10),
            Err(JobError::retryable("timeout")),
            true,
        );
        assert!(matches!(exhausted, Decision::Fail { .. }));
    }

    #[test]
    fn obsolete_wins_over_retry_budget() {
        let decider = RetryDecider::new(RetryPolicy::default());
        let d = decider.decide(
            &record_with_failures(0),
            Err(JobError::obsolete("thread deleted")),
            true,
        );
        assert!(matches!(d, Decision::Obsolete { .. }));
    }
}
