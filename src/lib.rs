//! # jobvisor
//!
//! **Jobvisor** is the orchestration core of an account backup tool: it
//! scrapes a user's data from a third-party site through authenticated pages
//! and JSON endpoints, one data category per task.
//!
//! The crate provides the parts that are hard to get right regardless of what
//! is being scraped: a pausable run-loop, a state machine gating all network
//! access, request pacing, a bounded job/task worker pool and a checkpoint
//! format that lets an interrupted job resume.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   ServiceHandle ── Envelope{id, Command} ──► Service::serve ─┐
//!   (remote caller)  ◄── Reply{id, Outcome} ──                 │ start / stop / status
//!                                                              │ emit / save_state
//!                                                              ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Service (run-loop)                                               │
//! │  - Gate (Stopped / StartPending / Running / StopPending)          │
//! │  - pending: BlockingQueue<PendingRequest>                         │
//! │  - slot: no unit chosen yet | active/restored unit                │
//! └──────┬─────────────────────────────────────────────┬──────────────┘
//!        ▼ "job"                                       ▼ any other name
//!   ┌──────────────────────────────┐            ┌──────────────────┐
//!   │ Job                          │            │ standalone Task  │
//!   │ - checkin() → Session        │            │ (global scope)   │
//!   │ - BlockingQueue<Task>        │            └──────────────────┘
//!   │ - N workers (failures        │
//!   │   isolated per task)         │
//!   └──────┬───────────────────────┘
//!          ▼
//!   Task (TaskKind variant) ── Fetcher ── gate.admit() + pacing ──► Fetch
//!                          └── Logger  ── tracing + history + Bus
//!                          └── Scope   ── local storage
//!
//! Gate / Logger / Service / Job ── publish(Event) ──► Bus ──► SubscriberSet
//! ```
//!
//! ### Lifecycle
//! ```text
//! emit(name, args) ──► pending queue
//!
//! loop {
//!   ├─► gate.ready()          Running → StartPending → Running, or park
//!   ├─► unit = restored unit, or materialize(pending.dequeue())
//!   ├─► gate.proceed()
//!   ├─► publish UnitStarting
//!   └─► unit.run()
//!         ├─ Ok  ──► publish UnitFinished
//!         └─ Err ──► log error, publish UnitFailed, gate.stop()
//!                    (next ready() parks in Stopped until start())
//! }
//! ```
//!
//! ## Features
//! | Area              | Description                                                 | Key types / traits                        |
//! |-------------------|-------------------------------------------------------------|-------------------------------------------|
//! | **Run-loop**      | Four-state gate, FIFO request queue, checkpoints.           | [`Service`], [`Gate`], [`RunLoopState`]   |
//! | **Jobs**          | Identity resolution, bounded worker pool, resume.           | [`Job`], [`JobRequest`], [`JobSnapshot`]  |
//! | **Tasks**         | Variant contract, progress counters, registry.              | [`Task`], [`TaskKind`], [`TaskRegistry`]  |
//! | **Network**       | Gated, paced fetch over an injected primitive.              | [`Fetcher`], [`Fetch`], [`CookieJar`]     |
//! | **Storage**       | Scoped keyed-record store, in-memory backend.               | [`Scope`], [`StorageFactory`], [`MemoryStorage`] |
//! | **Observability** | Event bus, subscribers, leveled logger.                     | [`Event`], [`Subscribe`], [`Logger`]      |
//! | **Remote control**| Typed command envelopes over a channel.                     | [`ServiceHandle`], [`Command`]            |
//! | **Errors**        | Typed errors for the run-loop and units of work.            | [`TaskError`], [`RuntimeError`]           |
//! | **Configuration** | Centralized settings, loadable from the environment.        | [`Config`]                                |
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use tokio_util::sync::CancellationToken;
//! use jobvisor::{Config, CookieJar, Fetch, LogWriter, MemoryStorage, ServiceBuilder, Subscribe};
//!
//! async fn backup(fetch: Arc<dyn Fetch>, cookies: Arc<dyn CookieJar>) -> Result<(), jobvisor::RuntimeError> {
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
//!     let service = ServiceBuilder::new(Config::default())
//!         .with_subscribers(subs)
//!         .build(fetch, cookies, Arc::new(MemoryStorage::new()));
//!
//!     let token = CancellationToken::new();
//!     let handle = service.handle(token.clone());
//!     service.spawn(token);
//!
//!     handle.emit("job", json!({ "tasks": ["Mock"] })).await?;
//!     handle.start().await
//! }
//! ```

mod config;
mod core;
mod error;
mod events;
mod job;
mod logger;
mod net;
mod queue;
mod session;
mod subscribers;
mod tasks;
mod telemetry;

pub mod storage;

// ---- Public re-exports ----

pub use crate::config::{Config, Endpoints};
pub use crate::core::{
    Command, Context, Envelope, Fetcher, Gate, Outcome, PendingRequest, Reply, RunLoopState,
    Service, ServiceBuilder, ServiceHandle, ServiceSnapshot, UnitSnapshot, JOB_REQUEST,
};
pub use crate::error::{ConfigError, FetchError, RuntimeError, SnapshotError, StorageError, TaskError};
pub use crate::events::{Bus, Event, EventKind};
pub use crate::job::{Job, JobRequest, JobSnapshot};
pub use crate::logger::{Level, LogEntry, Logger};
pub use crate::net::{Cookie, CookieJar, Fetch, FetchRequest, FetchResponse};
pub use crate::queue::BlockingQueue;
pub use crate::session::{checkin, fetch_user_info, Session};
pub use crate::storage::{MemoryScope, MemoryStorage, Record, Scope, StorageFactory, WriteOp};
pub use crate::subscribers::{LogWriter, Subscribe, SubscriberSet};
pub use crate::tasks::{
    Collaborators, Mock, Task, TaskContext, TaskKind, TaskRegistry, TaskSnapshot, Unknown,
    MOCK_URL,
};
pub use crate::telemetry::init_tracing;
