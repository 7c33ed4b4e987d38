//! Record store: typed CRUD for job records over a store transaction.

use crate::domain::{JobId, JobRecord};
use crate::ports::{Store, StoreError, Transaction};

const RECORDS: &str = "job_records";

/// Secondary index collection: one per label, id -> null.
fn label_index(label: &str) -> String {
    format!("{RECORDS}.label.{label}")
}

/// Job record persistence.
///
/// Records are JSON documents in the `job_records` collection keyed by id,
/// plus an entry in the label's index collection so recovery does not have to
/// scan every queue's records. Mutations take the caller's transaction, which
/// is what lets a status change commit together with domain-object writes.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecordStore;

impl RecordStore {
    pub fn new() -> Self {
        Self
    }

    pub fn save(&self, record: &JobRecord, txn: &mut dyn Transaction) -> Result<(), StoreError> {
        let key = record.id.to_string();
        txn.put(RECORDS, &key, serde_json::to_value(record)?)?;
        txn.put(&label_index(&record.label), &key, serde_json::Value::Null)?;
        Ok(())
    }

    pub fn find(&self, id: JobId, txn: &dyn Transaction) -> Result<Option<JobRecord>, StoreError> {
        match txn.get(RECORDS, &id.to_string())? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn load(&self, id: JobId, txn: &dyn Transaction) -> Result<JobRecord, StoreError> {
        self.find(id, txn)?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    pub fn delete(&self, id: JobId, txn: &mut dyn Transaction) -> Result<(), StoreError> {
        let record = self.load(id, txn)?;
        let key = id.to_string();
        txn.remove(RECORDS, &key)?;
        txn.remove(&label_index(&record.label), &key)?;
        Ok(())
    }

    /// Every record of `label`, in id (creation) order. Opens its own read transaction.
    pub fn load_all(&self, store: &dyn Store, label: &str) -> Result<Vec<JobRecord>, StoreError> {
        let txn = store.read()?;
        self.load_all_in(label, &*txn)
    }

    pub fn load_all_in(&self, label: &str, txn: &dyn Transaction) -> Result<Vec<JobRecord>, StoreError> {
        let mut records = Vec::new();
        for (key, _) in txn.scan(&label_index(label))? {
            let id: JobId = match key.parse() {
                Ok(id) => id,
                Err(err) => {
                    tracing::warn!(%key, error = %err, "skipping malformed label index entry");
                    continue;
                }
            };
            match self.find(id, txn)? {
                Some(record) => records.push(record),
                None => tracing::warn!(job_id = %id, label, "label index points at a missing record"),
            }
        }
        Ok(records)
    }
}
