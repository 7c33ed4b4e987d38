//! Demo collaborator: delivers chat messages stored next to the job records.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use courier_core::domain::{JobError, JobRecord};
use courier_core::ports::{BuildError, JobFactory, Operation, StoreError, Transaction};

pub const MESSAGES: &str = "messages";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation: String,
    pub body: String,
    pub state: DeliveryState,
}

impl Message {
    pub fn load(id: &str, txn: &dyn Transaction) -> Result<Option<Self>, StoreError> {
        match txn.get(MESSAGES, id)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub fn save(&self, txn: &mut dyn Transaction) -> Result<(), StoreError> {
        txn.put(MESSAGES, &self.id, serde_json::to_value(self)?)
    }

    /// Job payload pointing at this message.
    pub fn job_payload(&self) -> serde_json::Value {
        json!({ "message_id": self.id })
    }
}

fn message_id(record: &JobRecord) -> Option<&str> {
    record.payload.get("message_id").and_then(|v| v.as_str())
}

/// Fails the first `fail_times` attempts of every message with a retryable error.
pub struct MessageFactory {
    fail_times: u32,
}

impl MessageFactory {
    pub fn new(fail_times: u32) -> Self {
        Self { fail_times }
    }

    fn set_state(
        &self,
        record: &JobRecord,
        state: DeliveryState,
        txn: &mut dyn Transaction,
    ) -> Result<(), StoreError> {
        let Some(id) = message_id(record) else {
            return Ok(());
        };
        if let Some(mut message) = Message::load(id, txn)? {
            message.state = state;
            message.save(txn)?;
        }
        Ok(())
    }
}

impl JobFactory for MessageFactory {
    fn build_operation(
        &self,
        record: &JobRecord,
        txn: &dyn Transaction,
    ) -> Result<Box<dyn Operation>, BuildError> {
        let id = message_id(record)
            .ok_or_else(|| BuildError::Obsolete("payload has no message_id".to_string()))?;
        let message = Message::load(id, txn)?
            .ok_or_else(|| BuildError::Obsolete(format!("message {id} was deleted")))?;
        Ok(Box::new(SendMessage {
            message,
            fail_times: self.fail_times,
        }))
    }

    fn on_startup_recovery(
        &self,
        record: &JobRecord,
        txn: &mut dyn Transaction,
    ) -> Result<(), StoreError> {
        self.set_state(record, DeliveryState::Pending, txn)
    }

    fn on_success(&self, record: &JobRecord, txn: &mut dyn Transaction) -> Result<(), StoreError> {
        self.set_state(record, DeliveryState::Sent, txn)
    }

    fn on_terminal_failure(
        &self,
        record: &JobRecord,
        _error: &JobError,
        txn: &mut dyn Transaction,
    ) -> Result<(), StoreError> {
        self.set_state(record, DeliveryState::Failed, txn)
    }
}

struct SendMessage {
    message: Message,
    fail_times: u32,
}

#[async_trait]
impl Operation for SendMessage {
    async fn execute(&self, record: &JobRecord) -> Result<(), JobError> {
        if record.failure_count < self.fail_times {
            return Err(JobError::retryable(format!(
                "network unreachable (attempt {})",
                record.failure_count + 1
            )));
        }
        tracing::info!(
            message_id = %self.message.id,
            conversation = %self.message.conversation,
            "delivered: {}",
            self.message.body
        );
        Ok(())
    }
}
