//! courier-core
//!
//! A durable, retrying, key-serialized job queue.
//!
//! ジョブはトランザクショナルな key-value [`Store`] にレコードとして保存され、
//! 呼び出し側の書き込みと同じトランザクションでコミットされます。
//! つまりジョブは呼び出し側のトランザクションがコミットされたときにだけ存在します。
//!
//! - 同じ key のジョブは enqueue 順に 1 つずつ実行
//! - 異なる key のジョブは並行に実行
//! - 失敗した試行は上限付き指数バックオフでリトライ
//! - クラッシュで Running のまま残ったレコードは次回起動時に再投入
//!
//! # モジュール構成
//! - **domain**: レコード、状態、エラー、リトライポリシー、Decision、イベント
//! - **ports**: Store / Clock / IdGenerator / JobFactory の抽象化
//! - **queue**: レコードの永続化、key ごとのレーン、DurableOperation
//! - **app**: エンジンとビルダー
//! - **impls**: InMemory / SQLite の Store 実装
//! - **config**: キュー設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;

pub use app::{EngineBuilder, EngineState, JobQueueEngine, QueueCounts};
pub use config::QueueConfig;
pub use domain::{JobError, JobEvent, JobId, JobRecord, JobStatus, NewJob, QueueError, RetryPolicy};
pub use ports::{BuildError, JobFactory, Operation, Store, StoreError, Transaction};
