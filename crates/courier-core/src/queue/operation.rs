//! Durable operation: one execution attempt of one job record.

use std::sync::Arc;

use crate::domain::{Decision, JobError, JobRecord, RetryDecider};
use crate::ports::{JobFactory, Operation};

/// Receives the decision for a finished attempt and persists it.
///
/// Implemented by the engine. Injected into each operation instead of a
/// back-reference, so there is no ownership cycle.
pub trait CompletionSink: Send + Sync {
    fn complete(&self, record: &JobRecord, decision: Decision);
}

/// Wraps one record's execution attempt.
///
/// Flow:
/// 1. run the collaborator's operation
/// 2. classify the result (collaborator predicate + retry budget) into a [`Decision`]
/// 3. hand the decision to the sink, which commits the status change and hooks
///
/// Nothing escapes `run`: every error becomes a decision, and a panicking
/// work function becomes a permanent failure.
pub struct DurableOperation {
    record: JobRecord,
    operation: Box<dyn Operation>,
    factory: Arc<dyn JobFactory>,
    decider: RetryDecider,
    sink: Arc<dyn CompletionSink>,
}

impl DurableOperation {
    pub fn new(
        record: JobRecord,
        operation: Box<dyn Operation>,
        factory: Arc<dyn JobFactory>,
        decider: RetryDecider,
        sink: Arc<dyn CompletionSink>,
    ) -> Self {
        Self {
            record,
            operation,
            factory,
            decider,
            sink,
        }
    }

    pub fn record(&self) -> &JobRecord {
        &self.record
    }

    pub async fn run(self) {
        let DurableOperation {
            record,
            operation,
            factory,
            decider,
            sink,
        } = self;

        let result = execute_isolated(operation, record.clone()).await;
        let retryable = match &result {
            Ok(()) => false,
            Err(error) => factory.is_retryable(error),
        };
        if let Err(error) = &result {
            tracing::debug!(
                job_id = %record.id,
                failure_count = record.failure_count,
                retryable,
                error = %error,
                "attempt failed"
            );
        }
        let decision = decider.decide(&record, result, retryable);
        sink.complete(&record, decision);
    }
}

/// Run the work function in its own task so a panic surfaces as a `JoinError`.
async fn execute_isolated(operation: Box<dyn Operation>, record: JobRecord) -> Result<(), JobError> {
    let id = record.id;
    let handle = tokio::spawn(async move { operation.execute(&record).await });
    match handle.await {
        Ok(result) => result,
        Err(err) if err.is_panic() => {
            let payload = err.into_panic();
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            tracing::error!(job_id = %id, %message, "work function panicked");
            Err(JobError::permanent(format!("work function panicked: {message}")))
        }
        Err(err) => Err(JobError::retryable(format!("attempt cancelled: {err}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ErrorKind, JobId, NewJob, RetryPolicy};
    use crate::ports::{BuildError, Transaction};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;
    use ulid::Ulid;

    struct Fixed(Result<(), JobError>);

    #[async_trait]
    impl Operation for Fixed {
        async fn execute(&self, _record: &JobRecord) -> Result<(), JobError> {
            self.0.clone()
        }
    }

    /// Treats every error as permanent, whatever its kind.
    struct NothingRetryable;

    impl JobFactory for NothingRetryable {
        fn build_operation(
            &self,
            _record: &JobRecord,
            _txn: &dyn Transaction,
        ) -> Result<Box<dyn Operation>, BuildError> {
            Err(BuildError::Obsolete("unused".to_string()))
        }

        fn is_retryable(&self, _error: &JobError) -> bool {
            false
        }
    }

    struct DefaultClassifier;

    impl JobFactory for DefaultClassifier {
        fn build_operation(
            &self,
            _record: &JobRecord,
            _txn: &dyn Transaction,
        ) -> Result<Box<dyn Operation>, BuildError> {
            Err(BuildError::Obsolete("unused".to_string()))
        }
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<Decision>>);

    impl CompletionSink for Recorder {
        fn complete(&self, _record: &JobRecord, decision: Decision) {
            self.0.lock().unwrap().push(decision);
        }
    }

    fn record() -> JobRecord {
        JobRecord::new(
            JobId::from_ulid(Ulid::new()),
            "messages",
            NewJob::new(serde_json::Value::Null),
            Utc::now(),
        )
    }

    async fn run_once(result: Result<(), JobError>, factory: Arc<dyn JobFactory>) -> Decision {
        let sink = Arc::new(Recorder::default());
        let op = DurableOperation::new(
            record(),
            Box::new(Fixed(result)),
            factory,
            RetryDecider::new(RetryPolicy::for_tests()),
            sink.clone(),
        );
        op.run().await;
        let mut decisions = sink.0.lock().unwrap();
        assert_eq!(decisions.len(), 1);
        decisions.remove(0)
    }

    #[tokio::test]
    async fn success_reports_succeed() {
        let d = run_once(Ok(()), Arc::new(DefaultClassifier)).await;
        assert_eq!(d, Decision::Succeed);
    }

    #[tokio::test]
    async fn retryable_error_reports_retry() {
        let d = run_once(Err(JobError::retryable("timeout")), Arc::new(DefaultClassifier)).await;
        assert!(matches!(d, Decision::Retry { .. }));
    }

    struct Panics;

    #[async_trait]
    impl Operation for Panics {
        async fn execute(&self, _record: &JobRecord) -> Result<(), JobError> {
            panic!("payload decoder exploded");
        }
    }

    #[tokio::test]
    async fn panicking_work_becomes_a_permanent_failure() {
        let sink = Arc::new(Recorder::default());
        let op = DurableOperation::new(
            record(),
            Box::new(Panics),
            Arc::new(DefaultClassifier),
            RetryDecider::new(RetryPolicy::for_tests()),
            sink.clone(),
        );
        op.run().await;

        let decisions = sink.0.lock().unwrap();
        match decisions.as_slice() {
            [Decision::Fail { error }] => {
                assert_eq!(error.kind(), ErrorKind::Permanent);
                assert!(error.message().contains("payload decoder exploded"));
            }
            other => panic!("unexpected decisions: {other:?}"),
        }
    }

    #[tokio::test]
    async fn collaborator_predicate_decides_retryability() {
        let d = run_once(Err(JobError::retryable("timeout")), Arc::new(NothingRetryable)).await;
        assert!(matches!(d, Decision::Fail { .. }));
    }
}
