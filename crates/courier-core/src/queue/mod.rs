//! Queue module: record persistence, keyed lanes, and the durable operation.

mod lanes;
mod operation;
mod records;

pub use lanes::{KeyedExecutor, LaneKey};
pub use operation::{CompletionSink, DurableOperation};
pub use records::RecordStore;
