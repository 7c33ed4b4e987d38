//! Store port - 永続化の土台となるトランザクショナルな key/value 契約
//!
//! キューがストアに求める保証は 2 つだけです。
//! - 原子性: 1 つのトランザクションの書き込みはすべてコミットされるか、何も残らない
//! - 自己可視性: トランザクションは自分の未コミットの書き込みを読める
//!
//! 値は JSON ドキュメントで、名前付きコレクションにまとめられます。
//! ジョブレコードは専用のコレクションに置かれ、協調者は自分のドメインオブジェクトを
//! 同じトランザクションで別のコレクションに書きます。

use thiserror::Error;

/// Persistence-layer failure. Fatal to the current transaction only.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("transaction is read-only")]
    ReadOnly,

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Callback run once, after a successful commit.
pub type CommitCallback = Box<dyn FnOnce() + Send + 'static>;

/// A read or write transaction.
///
/// Dropping a transaction without calling [`Transaction::commit`] rolls it back.
/// Mutating calls on a read transaction fail with [`StoreError::ReadOnly`].
pub trait Transaction {
    fn is_writable(&self) -> bool;

    fn get(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    /// All entries of a collection, ordered by key.
    fn scan(&self, collection: &str) -> Result<Vec<(String, serde_json::Value)>, StoreError>;

    fn put(&mut self, collection: &str, key: &str, value: serde_json::Value)
    -> Result<(), StoreError>;

    /// Returns whether the key existed.
    fn remove(&mut self, collection: &str, key: &str) -> Result<bool, StoreError>;

    /// Register work to run after this transaction commits. Discarded on rollback.
    fn on_commit(&mut self, callback: CommitCallback);

    fn commit(self: Box<Self>) -> Result<(), StoreError>;
}

/// Transactional store shared by every engine and lane.
///
/// Write transactions are serialized by the store; callers never hold a
/// transaction across an `.await`.
pub trait Store: Send + Sync {
    fn read(&self) -> Result<Box<dyn Transaction + '_>, StoreError>;

    fn write(&self) -> Result<Box<dyn Transaction + '_>, StoreError>;
}

/// Run `f` in a write transaction and commit it if `f` succeeds.
pub fn with_write<R, E>(
    store: &dyn Store,
    f: impl FnOnce(&mut dyn Transaction) -> Result<R, E>,
) -> Result<R, E>
where
    E: From<StoreError>,
{
    let mut txn = store.write()?;
    let out = f(&mut *txn)?;
    txn.commit()?;
    Ok(out)
}
