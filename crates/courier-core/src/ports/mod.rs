//! Ports - キューと外の世界との境界
//!
//! - **Store**: トランザクショナルな永続化（実装は `impls`）
//! - **JobFactory / Operation**: ジョブの中身を知っている協調者
//! - **Clock / IdGenerator**: 時刻と ID。テストで差し替え可能

pub mod clock;
pub mod id_generator;
pub mod job_factory;
pub mod store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::job_factory::{BuildError, JobFactory, Operation};
pub use self::store::{CommitCallback, Store, StoreError, Transaction, with_write};
