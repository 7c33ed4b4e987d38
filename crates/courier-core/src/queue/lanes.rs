//! Keyed executor: one single-concurrency lane per key.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::{Semaphore, mpsc};

type WorkItem = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Lane selector. Missing and empty keys share the default lane.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LaneKey {
    Default,
    Keyed(String),
}

impl From<Option<&str>> for LaneKey {
    fn from(key: Option<&str>) -> Self {
        match key {
            Some(k) if !k.is_empty() => LaneKey::Keyed(k.to_string()),
            _ => LaneKey::Default,
        }
    }
}

impl fmt::Display for LaneKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaneKey::Default => f.write_str("<default>"),
            LaneKey::Keyed(k) => f.write_str(k),
        }
    }
}

/// Runs work items serially per key and concurrently across keys.
///
/// Design:
/// - A lane is an unbounded channel drained by one task; the task awaits each
///   item before taking the next, so items on one key never overlap and run in
///   enqueue order.
/// - Lanes are created on first use and kept for the executor's lifetime. Key
///   cardinality is bounded by the number of conversation-like targets.
/// - Each item runs in its own spawned task, so a panicking item is logged and
///   the lane carries on.
/// - An optional semaphore caps concurrently running items across all lanes.
pub struct KeyedExecutor {
    lanes: Mutex<HashMap<LaneKey, mpsc::UnboundedSender<WorkItem>>>,
    permits: Option<Arc<Semaphore>>,
}

impl KeyedExecutor {
    /// `max_concurrency = None` leaves lanes bounded only by the runtime's workers.
    pub fn new(max_concurrency: Option<usize>) -> Self {
        Self {
            lanes: Mutex::new(HashMap::new()),
            permits: max_concurrency.map(|n| Arc::new(Semaphore::new(n))),
        }
    }

    /// Append `work` to the lane for `key`. Must be called within a tokio runtime.
    pub fn enqueue<F>(&self, key: Option<&str>, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let lane_key = LaneKey::from(key);
        let mut lanes = self.lanes.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let item: WorkItem = Box::pin(work);
        let sender = lanes
            .entry(lane_key.clone())
            .or_insert_with(|| self.spawn_lane(lane_key.clone()));

        if let Err(mpsc::error::SendError(item)) = sender.send(item) {
            // The lane task is gone (runtime shutting down or aborted); start a fresh one.
            tracing::warn!(lane = %lane_key, "lane closed, respawning");
            let sender = self.spawn_lane(lane_key.clone());
            if sender.send(item).is_err() {
                tracing::error!(lane = %lane_key, "failed to hand work to a fresh lane");
            }
            lanes.insert(lane_key, sender);
        }
    }

    /// Number of lanes created so far.
    pub fn lane_count(&self) -> usize {
        self.lanes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    fn spawn_lane(&self, key: LaneKey) -> mpsc::UnboundedSender<WorkItem> {
        let (tx, rx) = mpsc::unbounded_channel();
        let permits = self.permits.clone();
        tracing::debug!(lane = %key, "starting lane");
        tokio::spawn(lane_loop(key, rx, permits));
        tx
    }
}

async fn lane_loop(
    key: LaneKey,
    mut rx: mpsc::UnboundedReceiver<WorkItem>,
    permits: Option<Arc<Semaphore>>,
) {
    while let Some(item) = rx.recv().await {
        let _permit = match &permits {
            Some(semaphore) => match Arc::clone(semaphore).acquire_owned().await {
                Ok(permit) => Some(permit),
                // Closed semaphore: nothing left to limit.
                Err(_) => None,
            },
            None => None,
        };

        if let Err(err) = tokio::spawn(item).await {
            tracing::error!(lane = %key, error = %err, "work item panicked");
        }
    }
    tracing::debug!(lane = %key, "lane stopped");
}
