//! # Service: the run-loop driving pending requests.
//!
//! ```text
//! emit(name, args) ──► pending: BlockingQueue<PendingRequest>
//!                                   │
//! loop {                            ▼
//!   gate.ready()            (parks while Stopped)
//!   unit = restored unit  or  materialize(pending.dequeue())
//!                           (a stop while waiting goes back to ready())
//!   gate.proceed()
//!   run unit ──► Ok  → UnitFinished
//!            └─► Err → log, UnitFailed, gate.stop(), discard
//! }
//! ```
//!
//! ## Rules
//! - Exactly one unit is in flight at a time; requests are consumed FIFO.
//! - A failed unit is never retried. The loop parks in `Stopped` until a
//!   manual `start()`; requests still queued wait for it.
//! - `stop()` never interrupts the unit in flight; it takes effect at the next
//!   `ready()`. A loop idle on an empty queue settles in `Stopped` at once.
//! - The slot tells "no unit chosen yet" (dequeue next) apart from a unit
//!   that is active or was restored from a checkpoint (run it first).
//!
//! A request named `"job"` becomes a [`Job`]; any other name is looked up in
//! the task registry and run as a standalone task against the global scope.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::{catch_panic, RuntimeError, SnapshotError, TaskError};
use crate::events::{Event, EventKind};
use crate::job::{Job, JobRequest, JobSnapshot};
use crate::logger::Logger;
use crate::queue::BlockingQueue;
use crate::tasks::{Task, TaskContext, TaskSnapshot};

use super::{Context, RunLoopState};

/// Request name that materializes a [`Job`].
pub const JOB_REQUEST: &str = "job";

/// A work item waiting in the service queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

/// Checkpoint form of the unit in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UnitSnapshot {
    Job(JobSnapshot),
    Task(TaskSnapshot),
}

/// Everything needed to pick up where a suspended service left off.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    /// Still-queued requests, in FIFO order.
    pub pending: Vec<PendingRequest>,
    /// The unit that was in flight, if any.
    pub current: Option<UnitSnapshot>,
}

impl ServiceSnapshot {
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(raw)?)
    }
}

#[derive(Clone)]
enum Unit {
    Job(Arc<Job>),
    Task(Arc<Task>),
}

impl Unit {
    fn name(&self) -> String {
        match self {
            Unit::Job(_) => JOB_REQUEST.to_string(),
            Unit::Task(task) => task.tag().to_string(),
        }
    }

    fn snapshot(&self) -> UnitSnapshot {
        match self {
            Unit::Job(job) => UnitSnapshot::Job(job.snapshot()),
            Unit::Task(task) => UnitSnapshot::Task(task.snapshot()),
        }
    }

    async fn run(&self) -> Result<(), TaskError> {
        match self {
            Unit::Job(job) => job.run().await,
            Unit::Task(task) => {
                let scope = task.scope()?;
                scope.open().await?;
                let result = catch_panic(task.run()).await;
                let closed = scope.close().await;
                if let (Err(_), Err(e)) = (&result, &closed) {
                    tracing::warn!(scope = scope.name(), error = %e, "close after failed task");
                }
                result?;
                Ok(closed?)
            }
        }
    }
}

enum Slot {
    Unchosen,
    Active(Unit),
}

/// The run-loop and its control surface.
pub struct Service {
    ctx: Arc<Context>,
    pending: BlockingQueue<PendingRequest>,
    slot: Mutex<Slot>,
    runtime_token: CancellationToken,
}

impl Service {
    pub(crate) fn new_internal(ctx: Arc<Context>, runtime_token: CancellationToken) -> Self {
        Self {
            ctx,
            pending: BlockingQueue::new(),
            slot: Mutex::new(Slot::Unchosen),
            runtime_token,
        }
    }

    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    pub fn logger(&self) -> &Logger {
        &self.ctx.logger
    }

    /// Queues a request; it runs once every earlier one has.
    pub fn emit(&self, name: impl Into<String>, args: Value) {
        let name = name.into();
        self.ctx
            .bus
            .publish(Event::new(EventKind::RequestQueued).with_request(name.as_str()));
        self.pending.enqueue(PendingRequest { name, args });
    }

    pub fn start(&self) -> Result<(), RuntimeError> {
        self.ctx.gate.start()
    }

    pub fn stop(&self) -> Result<(), RuntimeError> {
        self.ctx.gate.stop()
    }

    pub fn status(&self) -> RunLoopState {
        self.ctx.gate.status()
    }

    /// Stream of every runtime event (state changes, logs, lifecycle).
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.ctx.bus.subscribe()
    }

    /// Latest-value view of the run-loop state.
    pub fn watch_state(&self) -> watch::Receiver<RunLoopState> {
        self.ctx.gate.watch()
    }

    /// Number of requests still queued.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Spawns [`Service::run`] on the current runtime.
    pub fn spawn(self: &Arc<Self>, token: CancellationToken) -> JoinHandle<()> {
        let me = Arc::clone(self);
        tokio::spawn(async move { me.run(token).await })
    }

    /// Stops the subscriber listener. Call after the loop has exited.
    pub fn shutdown(&self) {
        self.runtime_token.cancel();
    }

    /// Drives the loop until `token` is cancelled.
    ///
    /// Cancellation is observed at the loop's own suspension points; a unit
    /// already running is awaited.
    pub async fn run(&self, token: CancellationToken) {
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.ctx.gate.ready() => {}
            }

            let restored = match &*self.slot.lock() {
                Slot::Active(unit) => Some(unit.clone()),
                Slot::Unchosen => None,
            };
            let unit = match restored {
                Some(unit) => unit,
                None => {
                    let request = tokio::select! {
                        biased;
                        _ = token.cancelled() => break,
                        _ = self.ctx.gate.stop_requested() => continue,
                        request = self.pending.dequeue() => request,
                    };
                    match self.materialize(&request) {
                        Ok(unit) => {
                            *self.slot.lock() = Slot::Active(unit.clone());
                            unit
                        }
                        Err(e) => {
                            self.fail(&request.name, &e);
                            continue;
                        }
                    }
                }
            };

            tokio::select! {
                _ = token.cancelled() => break,
                _ = self.ctx.gate.proceed() => {}
            }
            self.execute(unit).await;
        }
        tracing::debug!("run-loop exited");
    }

    fn materialize(&self, request: &PendingRequest) -> Result<Unit, TaskError> {
        if request.name == JOB_REQUEST {
            let args = JobRequest::from_args(&request.args)?;
            return Ok(Unit::Job(Arc::new(Job::new(self.ctx.clone(), args))));
        }
        let task = self.ctx.registry.create(&request.name);
        task.init(TaskContext {
            collaborators: self.ctx.collaborators(self.ctx.storage.global()),
            job_id: None,
            session: None,
            target_user: None,
            is_other_user: false,
        });
        Ok(Unit::Task(Arc::new(task)))
    }

    async fn execute(&self, unit: Unit) {
        let name = unit.name();
        self.ctx
            .bus
            .publish(Event::new(EventKind::UnitStarting).with_request(name.as_str()));

        let result = catch_panic(unit.run()).await;
        *self.slot.lock() = Slot::Unchosen;

        match result {
            Ok(()) => self
                .ctx
                .bus
                .publish(Event::new(EventKind::UnitFinished).with_request(name.as_str())),
            Err(e) => self.fail(&name, &e),
        }
    }

    /// Logs the failure, then stops the loop.
    fn fail(&self, name: &str, error: &TaskError) {
        self.ctx.logger.error(format!("Fail to run {name}: {error}"));
        self.ctx.bus.publish(
            Event::new(EventKind::UnitFailed)
                .with_request(name)
                .with_reason(error.to_string()),
        );
        if let Err(e) = self.ctx.gate.stop() {
            // already stopping
            tracing::debug!(error = %e, "stop after failure");
        }
    }

    /// Captures queued requests and the unit in flight.
    pub fn save_state(&self) -> ServiceSnapshot {
        let current = match &*self.slot.lock() {
            Slot::Active(unit) => Some(unit.snapshot()),
            Slot::Unchosen => None,
        };
        ServiceSnapshot {
            pending: self.pending.snapshot(),
            current,
        }
    }

    /// Loads a checkpoint into a stopped, idle service.
    ///
    /// The restored unit runs first after the next `start()`; restored
    /// requests are queued behind any already pending.
    pub fn restore(&self, snapshot: ServiceSnapshot) -> Result<(), RuntimeError> {
        {
            let mut slot = self.slot.lock();
            let state = self.status();
            if state != RunLoopState::Stopped || matches!(*slot, Slot::Active(_)) {
                return Err(RuntimeError::InvalidTransition {
                    op: "restore",
                    state,
                });
            }
            if let Some(current) = snapshot.current {
                *slot = Slot::Active(self.rebuild(current));
            }
        }
        for request in snapshot.pending {
            self.pending.enqueue(request);
        }
        Ok(())
    }

    fn rebuild(&self, snapshot: UnitSnapshot) -> Unit {
        match snapshot {
            UnitSnapshot::Job(job) => Unit::Job(Arc::new(Job::from_snapshot(job, self.ctx.clone()))),
            UnitSnapshot::Task(task) => Unit::Task(Arc::new(self.ctx.registry.from_snapshot(
                task,
                self.ctx.collaborators(self.ctx.storage.global()),
            ))),
        }
    }
}
