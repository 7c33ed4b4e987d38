//! SQLite-backed store.
//!
//! One table holds every collection:
//!
//! ```sql
//! kv(collection TEXT, key TEXT, value TEXT, PRIMARY KEY (collection, key))
//! ```
//!
//! The primary key doubles as the per-collection index, which is what the
//! label index of the record store relies on for its recovery scan.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, params};
use serde_json::Value;

use crate::ports::{CommitCallback, Store, StoreError, Transaction};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS kv (
    collection TEXT NOT NULL,
    key        TEXT NOT NULL,
    value      TEXT NOT NULL,
    PRIMARY KEY (collection, key)
) WITHOUT ROWID;
";

/// SQLite store over a single serialized connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn begin(&self, writable: bool) -> Result<Box<dyn Transaction + '_>, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))?;
        conn.execute_batch(if writable { "BEGIN IMMEDIATE" } else { "BEGIN DEFERRED" })?;
        Ok(Box::new(SqliteTxn {
            conn,
            writable,
            finished: false,
            callbacks: Vec::new(),
        }))
    }
}

impl Store for SqliteStore {
    fn read(&self) -> Result<Box<dyn Transaction + '_>, StoreError> {
        self.begin(false)
    }

    fn write(&self) -> Result<Box<dyn Transaction + '_>, StoreError> {
        self.begin(true)
    }
}

struct SqliteTxn<'a> {
    conn: MutexGuard<'a, Connection>,
    writable: bool,
    finished: bool,
    callbacks: Vec<CommitCallback>,
}

impl SqliteTxn<'_> {
    fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.writable {
            Ok(())
        } else {
            Err(StoreError::ReadOnly)
        }
    }
}

impl Transaction for SqliteTxn<'_> {
    fn is_writable(&self) -> bool {
        self.writable
    }

    fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM kv WHERE collection = ?1 AND key = ?2",
                params![collection, key],
                |row| row.get(0),
            )
            .optional()?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    fn scan(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT key, value FROM kv WHERE collection = ?1 ORDER BY key")?;
        let rows = stmt
            .query_map(params![collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(key, raw)| Ok((key, serde_json::from_str(&raw)?)))
            .collect()
    }

    fn put(&mut self, collection: &str, key: &str, value: Value) -> Result<(), StoreError> {
        self.ensure_writable()?;
        let raw = serde_json::to_string(&value)?;
        self.conn.execute(
            "INSERT INTO kv (collection, key, value) VALUES (?1, ?2, ?3)
             ON CONFLICT (collection, key) DO UPDATE SET value = excluded.value",
            params![collection, key, raw],
        )?;
        Ok(())
    }

    fn remove(&mut self, collection: &str, key: &str) -> Result<bool, StoreError> {
        self.ensure_writable()?;
        let removed = self.conn.execute(
            "DELETE FROM kv WHERE collection = ?1 AND key = ?2",
            params![collection, key],
        )?;
        Ok(removed > 0)
    }

    fn on_commit(&mut self, callback: CommitCallback) {
        self.callbacks.push(callback);
    }

    fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        let callbacks = std::mem::take(&mut self.callbacks);
        // Release the connection before running callbacks.
        drop(self);
        for callback in callbacks {
            callback();
        }
        Ok(())
    }
}

impl Drop for SqliteTxn<'_> {
    fn drop(&mut self) {
        if !self.finished
            && let Err(err) = self.conn.execute_batch("ROLLBACK")
        {
            tracing::warn!(error = %err, "sqlite rollback failed");
        }
    }
}
