//! Domain model - ドメインモデル
//!
//! ids, record, status, errors, retry, decision, events。
//! ストアやランタイムには依存しない純粋な型だけを置きます。

pub mod decision;
pub mod errors;
pub mod events;
pub mod ids;
pub mod record;
pub mod retry;
pub mod status;

pub use decision::{Decision, RetryDecider};
pub use errors::{ErrorKind, JobError, QueueError};
pub use events::JobEvent;
pub use ids::{JobId, ParseJobIdError};
pub use record::{JobRecord, NewJob};
pub use retry::RetryPolicy;
pub use status::JobStatus;
