//! JobFactory port - エンジンが利用する協調者の窓口
//!
//! エンジンはジョブが何をするかを知りません。協調者は永続化されたレコードを
//! 実行可能な [`Operation`] に戻し、ライフサイクルのフックを受け取ります。
//! フックはレコードを確定させるのと同じトランザクションの中で呼ばれます。

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{JobError, JobRecord};
use crate::ports::{StoreError, Transaction};

/// BuildError はレコードを作業に戻せなかったときのエラー
#[derive(Debug, Error)]
pub enum BuildError {
    /// The record's target no longer resolves (e.g. the referenced object was deleted).
    #[error("obsolete job: {0}")]
    Obsolete(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// One executable unit of work, built from a record.
#[async_trait]
pub trait Operation: Send + Sync {
    /// The actual send/execute action. Must tolerate being run more than once
    /// for the same record (delivery is at-least-once).
    async fn execute(&self, record: &JobRecord) -> Result<(), JobError>;
}

/// Collaborator hooks.
///
/// Hooks receive the write transaction that will persist the record's new
/// status, so domain side effects commit atomically with it. A hook error
/// rolls back the whole transaction.
pub trait JobFactory: Send + Sync {
    fn build_operation(
        &self,
        record: &JobRecord,
        txn: &dyn Transaction,
    ) -> Result<Box<dyn Operation>, BuildError>;

    fn is_retryable(&self, error: &JobError) -> bool {
        error.is_retryable()
    }

    /// 起動時リカバリで Ready に戻す直前に呼ばれる。
    ///
    /// コミットに失敗して保留になったレコードを後から回収するときにも呼ばれるため、
    /// 同じレコードに対して複数回呼ばれることがある。
    /// `record.status` はリカバリ前の状態のまま。
    fn on_startup_recovery(
        &self,
        _record: &JobRecord,
        _txn: &mut dyn Transaction,
    ) -> Result<(), StoreError> {
        Ok(())
    }

    fn on_success(&self, _record: &JobRecord, _txn: &mut dyn Transaction) -> Result<(), StoreError> {
        Ok(())
    }

    fn on_terminal_failure(
        &self,
        _record: &JobRecord,
        _error: &JobError,
        _txn: &mut dyn Transaction,
    ) -> Result<(), StoreError> {
        Ok(())
    }
}
