//! Impls - Store implementations.
//!
//! - **InMemoryStore**: tests and ephemeral queues
//! - **SqliteStore**: durable, survives process restarts

pub mod memory_store;
pub mod sqlite_store;

pub use self::memory_store::InMemoryStore;
pub use self::sqlite_store::SqliteStore;
