//! # Runtime events emitted by the service, its jobs and the logger.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Control events**: run-loop state transitions
//! - **Log events**: entries accepted by the [`Logger`](crate::Logger)
//! - **Work events**: request intake and unit / job / task lifecycle
//! - **Subscriber events**: fan-out overflow and panics
//!
//! The [`Event`] struct carries additional metadata such as timestamps, task
//! name, job id, reasons and the state pair of a transition.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use jobvisor::{Event, EventKind, RunLoopState};
//!
//! let ev = Event::state_changed(RunLoopState::Stopped, RunLoopState::StartPending);
//!
//! assert_eq!(ev.kind, EventKind::StateChanged);
//! assert_eq!(ev.to, Some(RunLoopState::StartPending));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::core::RunLoopState;
use crate::logger::LogEntry;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Control ===
    /// The run-loop moved between two states.
    ///
    /// Sets:
    /// - `from`, `to`: previous and new state
    StateChanged,

    // === Logging ===
    /// A log entry passed the logger threshold.
    ///
    /// Sets:
    /// - `entry`: the log entry
    Log,

    // === Work intake ===
    /// A pending request was queued through `emit`.
    ///
    /// Sets:
    /// - `request`: request name
    RequestQueued,

    /// The run-loop is about to execute a unit (job or standalone task).
    ///
    /// Sets:
    /// - `request`: unit name
    UnitStarting,

    /// The unit finished without error.
    ///
    /// Sets:
    /// - `request`: unit name
    UnitFinished,

    /// The unit failed; the run-loop is stopping.
    ///
    /// Sets:
    /// - `request`: unit name
    /// - `reason`: failure message
    UnitFailed,

    // === Job lifecycle ===
    /// A job record was created and its workers are about to start.
    ///
    /// Sets:
    /// - `job`: job id
    JobStarted,

    /// All workers of a job have terminated.
    ///
    /// Sets:
    /// - `job`: job id
    JobFinished,

    // === Task lifecycle ===
    /// A worker picked a task.
    ///
    /// Sets:
    /// - `task`: task name
    /// - `job`: job id, if any
    TaskStarting,

    /// A task completed.
    ///
    /// Sets:
    /// - `task`: task name
    /// - `job`: job id, if any
    TaskStopped,

    /// A task's progress counters moved.
    ///
    /// Sets:
    /// - `task`: task name
    /// - `job`: job id, if any
    /// - `progress`: `(completed, total)`
    TaskProgress,

    /// A task failed; siblings are unaffected.
    ///
    /// Sets:
    /// - `task`: task name
    /// - `job`: job id, if any
    /// - `reason`: failure message
    TaskFailed,

    // === Subscriber events ===
    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `task`: subscriber name
    /// - `reason`: reason string
    SubscriberOverflow,

    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `task`: subscriber name
    /// - `reason`: panic info
    SubscriberPanicked,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Previous run-loop state (state changes only).
    pub from: Option<RunLoopState>,
    /// New run-loop state (state changes only).
    pub to: Option<RunLoopState>,
    /// Log entry (log events only).
    pub entry: Option<Arc<LogEntry>>,
    /// Name of the pending request / unit.
    pub request: Option<Arc<str>>,
    /// Name of the task or subscriber.
    pub task: Option<Arc<str>>,
    /// Job id.
    pub job: Option<u64>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// `(completed, total)` of a task (progress events only).
    pub progress: Option<(u64, u64)>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            from: None,
            to: None,
            entry: None,
            request: None,
            task: None,
            job: None,
            reason: None,
            progress: None,
        }
    }

    /// Creates a state change event.
    #[inline]
    pub fn state_changed(from: RunLoopState, to: RunLoopState) -> Self {
        let mut ev = Event::new(EventKind::StateChanged);
        ev.from = Some(from);
        ev.to = Some(to);
        ev
    }

    /// Creates a log event.
    #[inline]
    pub fn log(entry: LogEntry) -> Self {
        let mut ev = Event::new(EventKind::Log);
        ev.entry = Some(Arc::new(entry));
        ev
    }

    /// Attaches a request / unit name.
    #[inline]
    pub fn with_request(mut self, name: impl Into<Arc<str>>) -> Self {
        self.request = Some(name.into());
        self
    }

    /// Attaches a task name.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a job id, if known.
    #[inline]
    pub fn with_job(mut self, job: Option<u64>) -> Self {
        self.job = job;
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a task progress event.
    #[inline]
    pub fn task_progress(
        task: impl Into<Arc<str>>,
        job: Option<u64>,
        completed: u64,
        total: u64,
    ) -> Self {
        let mut ev = Event::new(EventKind::TaskProgress)
            .with_task(task)
            .with_job(job);
        ev.progress = Some((completed, total));
        ev
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }

    #[inline]
    pub fn is_subscriber_panic(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberPanicked)
    }
}
