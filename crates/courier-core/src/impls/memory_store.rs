//! In-memory store implementation.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;

use crate::ports::{CommitCallback, Store, StoreError, Transaction};

/// collection -> key -> value
type Collections = HashMap<String, BTreeMap<String, Value>>;

/// In-memory transactional store.
///
/// Design:
/// - One mutex guards all committed data; a transaction holds it for its whole
///   lifetime, so transactions are fully serialized.
/// - Writes are staged and applied only on commit. Dropping the transaction
///   discards them.
/// - Commit failures can be injected to exercise the engine's error paths.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<Collections>,
    fail_commits: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write commit fail with [`StoreError::Unavailable`].
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    fn begin(&self, writable: bool) -> Result<Box<dyn Transaction + '_>, StoreError> {
        let guard = self
            .state
            .lock()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        Ok(Box::new(MemoryTxn {
            guard,
            staged: BTreeMap::new(),
            writable,
            callbacks: Vec::new(),
            fail_commit: writable && self.fail_commits.load(Ordering::SeqCst),
        }))
    }
}

impl Store for InMemoryStore {
    fn read(&self) -> Result<Box<dyn Transaction + '_>, StoreError> {
        self.begin(false)
    }

    fn write(&self) -> Result<Box<dyn Transaction + '_>, StoreError> {
        self.begin(true)
    }
}

struct MemoryTxn<'a> {
    guard: MutexGuard<'a, Collections>,
    /// (collection, key) -> Some(value) for puts, None for removals.
    staged: BTreeMap<(String, String), Option<Value>>,
    writable: bool,
    callbacks: Vec<CommitCallback>,
    fail_commit: bool,
}

impl MemoryTxn<'_> {
    fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.writable {
            Ok(())
        } else {
            Err(StoreError::ReadOnly)
        }
    }
}

impl Transaction for MemoryTxn<'_> {
    fn is_writable(&self) -> bool {
        self.writable
    }

    fn get(&self, collection: &str, key: &str) -> Result<Option<Value>, StoreError> {
        if let Some(staged) = self.staged.get(&(collection.to_string(), key.to_string())) {
            return Ok(staged.clone());
        }
        Ok(self
            .guard
            .get(collection)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn scan(&self, collection: &str) -> Result<Vec<(String, Value)>, StoreError> {
        let mut merged = self.guard.get(collection).cloned().unwrap_or_default();
        for ((c, key), value) in &self.staged {
            if c != collection {
                continue;
            }
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        Ok(merged.into_iter().collect())
    }

    fn put(&mut self, collection: &str, key: &str, value: Value) -> Result<(), StoreError> {
        self.ensure_writable()?;
        self.staged
            .insert((collection.to_string(), key.to_string()), Some(value));
        Ok(())
    }

    fn remove(&mut self, collection: &str, key: &str) -> Result<bool, StoreError> {
        self.ensure_writable()?;
        let existed = self.get(collection, key)?.is_some();
        self.staged
            .insert((collection.to_string(), key.to_string()), None);
        Ok(existed)
    }

    fn on_commit(&mut self, callback: CommitCallback) {
        self.callbacks.push(callback);
    }

    fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTxn {
            mut guard,
            staged,
            callbacks,
            fail_commit,
            ..
        } = *self;

        if fail_commit && !staged.is_empty() {
            return Err(StoreError::Unavailable("injected commit failure".to_string()));
        }

        for ((collection, key), value) in staged {
            let entries = guard.entry(collection).or_default();
            match value {
                Some(value) => {
                    entries.insert(key, value);
                }
                None => {
                    entries.remove(&key);
                }
            }
        }
        // Callbacks run after the lock is released.
        drop(guard);
        for callback in callbacks {
            callback();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn committed_writes_are_visible() {
        let store = InMemoryStore::new();
        let mut txn = store.write().unwrap();
        txn.put("messages", "m1", json!({"body": "hi"})).unwrap();
        txn.commit().unwrap();

        let txn = store.read().unwrap();
        assert_eq!(txn.get("messages", "m1").unwrap(), Some(json!({"body": "hi"})));
    }

    #[test]
    fn transaction_reads_its_own_writes() {
        let store = InMemoryStore::new();
        let mut txn = store.write().unwrap();
        txn.put("messages", "m1", json!(1)).unwrap();
        assert_eq!(txn.get("messages", "m1").unwrap(), Some(json!(1)));
        assert!(txn.remove("messages", "m1").unwrap());
        assert_eq!(txn.get("messages", "m1").unwrap(), None);
    }

    #[test]
    fn dropping_rolls_back() {
        let store = InMemoryStore::new();
        {
            let mut txn = store.write().unwrap();
            txn.put("messages", "m1", json!(1)).unwrap();
        }
        let txn = store.read().unwrap();
        assert_eq!(txn.get("messages", "m1").unwrap(), None);
    }

    #[test]
    fn read_transactions_reject_writes() {
        let store = InMemoryStore::new();
        let mut txn = store.read().unwrap();
        assert!(!txn.is_writable());
        assert!(matches!(
            txn.put("messages", "m1", json!(1)),
            Err(StoreError::ReadOnly)
        ));
        assert!(matches!(
            txn.remove("messages", "m1"),
            Err(StoreError::ReadOnly)
        ));
    }

    #[test]
    fn scan_merges_staged_entries_in_key_order() {
        let store = InMemoryStore::new();
        let mut txn = store.write().unwrap();
        txn.put("c", "b", json!(2)).unwrap();
        txn.put("c", "a", json!(1)).unwrap();
        txn.commit().unwrap();

        let mut txn = store.write().unwrap();
        txn.put("c", "c", json!(3)).unwrap();
        txn.remove("c", "a").unwrap();
        txn.put("other", "x", json!(0)).unwrap();
        let keys: Vec<String> = txn.scan("c").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn commit_callbacks_run_only_on_success() {
        let store = InMemoryStore::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut txn = store.write().unwrap();
        txn.put("c", "k", json!(1)).unwrap();
        let counter = Arc::clone(&calls);
        txn.on_commit(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        txn.commit().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        store.set_fail_commits(true);
        let mut txn = store.write().unwrap();
        txn.put("c", "k", json!(2)).unwrap();
        let counter = Arc::clone(&calls);
        txn.on_commit(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(matches!(txn.commit(), Err(StoreError::Unavailable(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let txn = store.read().unwrap();
        assert_eq!(txn.get("c", "k").unwrap(), Some(json!(1)));
    }
}
