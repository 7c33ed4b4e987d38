//! JobQueueEngine - 起動時リカバリ、Ready ゲート、ディスパッチ、完了処理
//!
//! # 設計
//! - すべてのディスパッチは 1 本のループ（`dispatch_loop`）を通る
//! - トランザクションを `.await` をまたいで保持しない
//! - ストアに拒否されたリカバリや結果のコミットは、レコードを保留にして
//!   `reclaim_delay` ごとに回収を再試行する

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use super::status::QueueCounts;
use crate::config::QueueConfig;
use crate::domain::{
    Decision, JobEvent, JobId, JobRecord, JobStatus, NewJob, QueueError, RetryDecider,
};
use crate::ports::{BuildError, Clock, IdGenerator, JobFactory, Operation, Store, Transaction};
use crate::queue::{CompletionSink, DurableOperation, KeyedExecutor, RecordStore};

/// Readiness gate. Dispatch is suppressed while `NotReady`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotReady,
    Ready,
}

enum Command {
    /// Recovery (first time only) followed by dispatch of every Ready record.
    ReadyPass,
    Dispatch(JobId),
    /// Retry recovery of a record the store refused to reset earlier.
    Reclaim(JobId),
}

struct Gate {
    state: EngineState,
    /// Startup recovery already ran for this engine.
    recovered: bool,
    /// Not in flight, but stuck in their pre-recovery status because a
    /// recovery or outcome commit failed. Never dispatched until reclaimed.
    unrecovered: HashSet<JobId>,
}

enum Prepared {
    Run(JobRecord, Box<dyn Operation>),
    Obsolete(String),
    /// Ready, but still inside its backoff window.
    NotDue(Duration),
    Skip,
}

/// Durable, retrying, key-serialized job queue for one label.
///
/// # Flow
/// 1. `enqueue` persists a Ready record in the caller's transaction; its commit
///    callback asks the dispatch loop to run it.
/// 2. `set_ready(true)` recovers interrupted records (first time only) and
///    dispatches every Ready record.
/// 3. Dispatch builds the operation through the collaborator, marks the record
///    Running and hands a [`DurableOperation`] to the record's lane.
/// 4. The operation's decision is committed together with the collaborator's
///    hook; retries go back through the dispatch loop after their delay.
///
/// Must be built inside a tokio runtime.
pub struct JobQueueEngine {
    core: Arc<EngineCore>,
    shutdown_tx: watch::Sender<bool>,
    dispatcher: Option<JoinHandle<()>>,
}

impl JobQueueEngine {
    pub(crate) fn start(
        config: QueueConfig,
        store: Arc<dyn Store>,
        factory: Arc<dyn JobFactory>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let core = Arc::new(EngineCore {
            executor: KeyedExecutor::new(config.max_concurrency),
            decider: RetryDecider::new(config.retry.clone()),
            records: RecordStore::new(),
            gate: Mutex::new(Gate {
                state: EngineState::NotReady,
                recovered: false,
                unrecovered: HashSet::new(),
            }),
            commands: commands_tx,
            config,
            store,
            factory,
            clock,
            ids,
            events,
        });

        let dispatcher = tokio::spawn(dispatch_loop(Arc::clone(&core), commands_rx, shutdown_rx));
        tracing::info!(label = %core.config.label, "job queue engine started");

        Self {
            core,
            shutdown_tx,
            dispatcher: Some(dispatcher),
        }
    }

    pub fn label(&self) -> &str {
        &self.core.config.label
    }

    pub fn config(&self) -> &QueueConfig {
        &self.core.config
    }

    /// Create a Ready record inside the caller's write transaction.
    ///
    /// The job is dispatched only after `txn` commits; if the caller rolls
    /// back, the job never existed.
    pub fn enqueue(&self, job: NewJob, txn: &mut dyn Transaction) -> Result<JobId, QueueError> {
        let core = &self.core;
        let id = core.ids.generate_job_id();
        let record = JobRecord::new(id, core.config.label.as_str(), job, core.clock.now());
        core.records.save(&record, txn)?;

        let commands = core.commands.clone();
        txn.on_commit(Box::new(move || {
            // The loop is gone only after shutdown; the record stays Ready for the next start.
            let _ = commands.send(Command::Dispatch(id));
        }));

        tracing::debug!(job_id = %id, key = ?record.key, label = %record.label, "job enqueued");
        Ok(id)
    }

    /// Open or close the readiness gate.
    ///
    /// `NotReady -> Ready` triggers one pass, run on the dispatch loop rather
    /// than the caller's thread. The first such pass also performs startup
    /// recovery.
    pub fn set_ready(&self, ready: bool) {
        let next = if ready {
            EngineState::Ready
        } else {
            EngineState::NotReady
        };
        let previous = {
            let mut gate = self.core.lock_gate();
            std::mem::replace(&mut gate.state, next)
        };

        if previous == EngineState::NotReady && next == EngineState::Ready {
            tracing::info!(label = %self.core.config.label, "engine ready");
            let _ = self.core.commands.send(Command::ReadyPass);
        } else if previous == EngineState::Ready && next == EngineState::NotReady {
            tracing::info!(label = %self.core.config.label, "engine paused");
        }
    }

    pub fn state(&self) -> EngineState {
        self.core.lock_gate().state
    }

    pub fn is_ready(&self) -> bool {
        self.core.is_ready()
    }

    pub fn record(&self, id: JobId) -> Result<Option<JobRecord>, QueueError> {
        let txn = self.core.store.read()?;
        Ok(self.core.records.find(id, &*txn)?)
    }

    pub fn counts(&self) -> Result<QueueCounts, QueueError> {
        let records = self
            .core
            .records
            .load_all(&*self.core.store, &self.core.config.label)?;
        Ok(QueueCounts::from_records(&records))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.core.events.subscribe()
    }

    pub fn lane_count(&self) -> usize {
        self.core.executor.lane_count()
    }

    /// Stop the dispatch loop and wait for it. Work already handed to a lane
    /// is not cancelled.
    pub async fn shutdown_and_join(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(dispatcher) = self.dispatcher.take() {
            let _ = dispatcher.await;
        }
    }
}

impl Drop for JobQueueEngine {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn dispatch_loop(
    core: Arc<EngineCore>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }

        let command = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            command = commands.recv() => match command {
                Some(command) => command,
                None => break,
            },
        };

        match command {
            Command::ReadyPass => core.ready_pass(),
            Command::Dispatch(id) if core.can_dispatch() => {
                core.dispatch(id);
            }
            Command::Dispatch(id) => {
                // Picked up from the store by the next ready pass.
                tracing::debug!(job_id = %id, "engine not ready, dispatch deferred");
            }
            Command::Reclaim(id) if core.can_dispatch() => core.reclaim(id, true),
            Command::Reclaim(id) => {
                tracing::debug!(job_id = %id, "engine not ready, reclaim deferred");
            }
        }
    }
    tracing::info!(label = %core.config.label, "dispatch loop stopped");
}

struct EngineCore {
    config: QueueConfig,
    store: Arc<dyn Store>,
    records: RecordStore,
    factory: Arc<dyn JobFactory>,
    executor: KeyedExecutor,
    decider: RetryDecider,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    gate: Mutex<Gate>,
    commands: mpsc::UnboundedSender<Command>,
    events: broadcast::Sender<JobEvent>,
}

impl EngineCore {
    fn lock_gate(&self) -> MutexGuard<'_, Gate> {
        self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_ready(&self) -> bool {
        self.lock_gate().state == EngineState::Ready
    }

    /// Ready and past startup recovery. Nothing may run before recovery has
    /// reconciled the records a previous run left behind.
    fn can_dispatch(&self) -> bool {
        let gate = self.lock_gate();
        gate.state == EngineState::Ready && gate.recovered
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn ready_pass(self: &Arc<Self>) {
        if !self.is_ready() {
            return;
        }

        let needs_recovery = {
            let mut gate = self.lock_gate();
            !std::mem::replace(&mut gate.recovered, true)
        };
        if needs_recovery {
            if let Err(err) = self.recover() {
                tracing::error!(label = %self.config.label, error = %err, "startup recovery failed");
                self.lock_gate().recovered = false;
                return;
            }
        }

        let records = match self.records.load_all(&*self.store, &self.config.label) {
            Ok(records) => records,
            Err(err) => {
                tracing::error!(label = %self.config.label, error = %err, "failed to load ready records");
                return;
            }
        };

        for id in self.unrecovered_ids() {
            self.reclaim(id, false);
        }

        let mut dispatched = 0usize;
        for record in records.iter().filter(|r| r.status == JobStatus::Ready) {
            if !self.is_ready() {
                break;
            }
            if self.is_unrecovered(record.id) {
                continue;
            }
            if self.dispatch(record.id) {
                dispatched += 1;
            }
        }
        tracing::info!(label = %self.config.label, dispatched, "ready pass complete");
    }

    /// Reconcile every non-terminal record left over from a previous run.
    fn recover(&self) -> Result<(), QueueError> {
        let records = self.records.load_all(&*self.store, &self.config.label)?;
        let mut recovered = 0usize;
        for record in records.iter().filter(|r| !r.status.is_terminal()) {
            match self.recover_one(record.id) {
                Ok(Some(event)) => {
                    recovered += 1;
                    self.emit(event);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(job_id = %record.id, error = %err, "failed to recover job; it keeps its stored status");
                    self.mark_unrecovered(record.id);
                }
            }
        }
        tracing::info!(label = %self.config.label, recovered, "startup recovery complete");
        Ok(())
    }

    fn unrecovered_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.lock_gate().unrecovered.iter().copied().collect();
        ids.sort();
        ids
    }

    fn is_unrecovered(&self, id: JobId) -> bool {
        self.lock_gate().unrecovered.contains(&id)
    }

    /// Park a record that is not in flight but could not be reset, and retry
    /// it after the reclaim delay.
    fn mark_unrecovered(&self, id: JobId) {
        self.lock_gate().unrecovered.insert(id);
        self.schedule(Command::Reclaim(id), self.config.reclaim_delay());
    }

    /// Reset a parked record to Ready (recovery hook included) and dispatch it.
    fn reclaim(self: &Arc<Self>, id: JobId, reschedule: bool) {
        if !self.is_unrecovered(id) {
            return;
        }
        match self.recover_one(id) {
            Ok(event) => {
                self.lock_gate().unrecovered.remove(&id);
                tracing::info!(job_id = %id, "job reclaimed");
                if let Some(event) = event {
                    self.emit(event);
                }
                self.dispatch(id);
            }
            Err(err) => {
                tracing::warn!(job_id = %id, error = %err, "failed to reclaim job");
                if reschedule {
                    self.schedule(Command::Reclaim(id), self.config.reclaim_delay());
                }
            }
        }
    }

    fn recover_one(&self, id: JobId) -> Result<Option<JobEvent>, QueueError> {
        let mut txn = self.store.write()?;
        let Some(mut record) = self.records.find(id, &*txn)? else {
            return Ok(None);
        };
        if record.status.is_terminal() {
            return Ok(None);
        }

        let previous = record.status;
        let now = self.clock.now();
        let event = match self.factory.build_operation(&record, &*txn) {
            Ok(_) => {
                self.factory.on_startup_recovery(&record, &mut *txn)?;
                record.reset_for_recovery(now)?;
                self.records.save(&record, &mut *txn)?;
                JobEvent::Recovered { id, previous }
            }
            Err(BuildError::Obsolete(reason)) => {
                record.mark_obsolete(&reason, now)?;
                self.finalize(&record, &mut *txn)?;
                JobEvent::Obsolete { id, reason }
            }
            Err(BuildError::Store(err)) => return Err(err.into()),
        };
        txn.commit()?;

        tracing::debug!(job_id = %id, previous = %previous, "job recovered");
        Ok(Some(event))
    }

    /// Dispatch one record if it is Ready. Returns whether it was handed to a lane.
    fn dispatch(self: &Arc<Self>, id: JobId) -> bool {
        match self.prepare(id) {
            Ok(Prepared::Run(record, operation)) => {
                let key = record.key.clone();
                let sink: Arc<dyn CompletionSink> = self.clone();
                let op = DurableOperation::new(
                    record,
                    operation,
                    Arc::clone(&self.factory),
                    self.decider.clone(),
                    sink,
                );
                tracing::debug!(job_id = %id, key = ?key, "job dispatched");
                self.emit(JobEvent::Dispatched {
                    id,
                    key: key.clone(),
                });
                self.executor.enqueue(key.as_deref(), op.run());
                true
            }
            Ok(Prepared::Obsolete(reason)) => {
                tracing::info!(job_id = %id, %reason, "job obsolete before dispatch");
                self.emit(JobEvent::Obsolete { id, reason });
                false
            }
            Ok(Prepared::NotDue(remaining)) => {
                tracing::debug!(job_id = %id, delay_ms = remaining.as_millis() as u64, "job still backing off");
                self.schedule(Command::Dispatch(id), remaining);
                false
            }
            Ok(Prepared::Skip) => false,
            Err(err) => {
                tracing::warn!(job_id = %id, error = %err, "dispatch failed; job keeps its stored status");
                self.schedule(Command::Dispatch(id), self.config.reclaim_delay());
                false
            }
        }
    }

    fn prepare(&self, id: JobId) -> Result<Prepared, QueueError> {
        let mut txn = self.store.write()?;
        let Some(mut record) = self.records.find(id, &*txn)? else {
            return Ok(Prepared::Skip);
        };
        // Running means already in flight: never dispatch twice.
        if record.label != self.config.label || record.status != JobStatus::Ready {
            return Ok(Prepared::Skip);
        }

        let now = self.clock.now();
        if let Some(remaining) = record.remaining_backoff(now) {
            return Ok(Prepared::NotDue(remaining));
        }
        match self.factory.build_operation(&record, &*txn) {
            Ok(operation) => {
                record.start(now)?;
                self.records.save(&record, &mut *txn)?;
                txn.commit()?;
                Ok(Prepared::Run(record, operation))
            }
            Err(BuildError::Obsolete(reason)) => {
                record.mark_obsolete(&reason, now)?;
                self.finalize(&record, &mut *txn)?;
                txn.commit()?;
                Ok(Prepared::Obsolete(reason))
            }
            Err(BuildError::Store(err)) => Err(err.into()),
        }
    }

    /// Persist a terminal record, or delete it if the job asked for that.
    fn finalize(&self, record: &JobRecord, txn: &mut dyn Transaction) -> Result<(), QueueError> {
        if record.remove_after_terminal {
            self.records.delete(record.id, txn)?;
        } else {
            self.records.save(record, txn)?;
        }
        Ok(())
    }

    fn persist_decision(&self, id: JobId, decision: &Decision) -> Result<Option<JobEvent>, QueueError> {
        let mut txn = self.store.write()?;
        let Some(mut record) = self.records.find(id, &*txn)? else {
            tracing::warn!(job_id = %id, "job vanished while running");
            return Ok(None);
        };
        if record.status != JobStatus::Running {
            tracing::warn!(job_id = %id, status = %record.status, "completion for a job that is not running");
            return Ok(None);
        }

        let now = self.clock.now();
        let event = match decision {
            Decision::Succeed => {
                record.mark_succeeded(now)?;
                self.factory.on_success(&record, &mut *txn)?;
                self.finalize(&record, &mut *txn)?;
                JobEvent::Succeeded { id }
            }
            Decision::Retry { delay, error } => {
                record.record_retryable_failure(error, now)?;
                record.defer(*delay);
                self.records.save(&record, &mut *txn)?;
                JobEvent::RetryScheduled {
                    id,
                    failure_count: record.failure_count,
                    delay: *delay,
                }
            }
            Decision::Fail { error } => {
                record.mark_permanently_failed(error, now)?;
                self.factory.on_terminal_failure(&record, error, &mut *txn)?;
                self.finalize(&record, &mut *txn)?;
                JobEvent::PermanentlyFailed {
                    id,
                    error: error.message().to_string(),
                }
            }
            Decision::Obsolete { error } => {
                record.mark_obsolete(error.message(), now)?;
                self.finalize(&record, &mut *txn)?;
                JobEvent::Obsolete {
                    id,
                    reason: error.message().to_string(),
                }
            }
        };
        txn.commit()?;
        Ok(Some(event))
    }

    /// Send `command` to the dispatch loop after `delay`.
    fn schedule(&self, command: Command, delay: Duration) {
        let commands = self.commands.clone();
        if delay.is_zero() {
            let _ = commands.send(command);
            return;
        }
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(command);
        });
    }
}

impl CompletionSink for EngineCore {
    fn complete(&self, record: &JobRecord, decision: Decision) {
        let id = record.id;
        match self.persist_decision(id, &decision) {
            Ok(Some(event)) => {
                let retry_delay = match &event {
                    JobEvent::RetryScheduled {
                        failure_count,
                        delay,
                        ..
                    } => {
                        tracing::info!(
                            job_id = %id,
                            failure_count,
                            delay_ms = delay.as_millis() as u64,
                            "job failed, retry scheduled"
                        );
                        Some(*delay)
                    }
                    JobEvent::PermanentlyFailed { error, .. } => {
                        tracing::warn!(job_id = %id, %error, "job permanently failed");
                        None
                    }
                    _ => {
                        tracing::debug!(job_id = %id, ?event, "job finished");
                        None
                    }
                };
                self.emit(event);
                if let Some(delay) = retry_delay {
                    self.schedule(Command::Dispatch(id), delay);
                }
            }
            Ok(None) => {}
            Err(err) => {
                // Rolled back: still Running in the store, but no longer in flight.
                tracing::error!(job_id = %id, error = %err, "failed to persist attempt outcome");
                self.mark_unrecovered(id);
            }
        }
    }
}
