//! # Task: one data category's unit of work.
//!
//! A [`Task`] pairs a variant ([`TaskKind`]) with the plain state every
//! variant shares: the job it belongs to, the session and target user it runs
//! for, and its progress counters. Collaborators (fetcher, logger, storage
//! scope) are injected by [`Task::init`] or on restore and are never part of
//! the [`TaskSnapshot`].
//!
//! ## Progress rules
//! - `init` resets progress to `0 / 1`.
//! - `step()` adds exactly one completed unit; going past `total` raises
//!   `total` with it.
//! - `complete()` sets `completed = total`.
//! - `set_total(n)` never drops `total` below `completed` or below 1.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::core::Fetcher;
use crate::error::TaskError;
use crate::events::{Bus, Event};
use crate::logger::Logger;
use crate::net::{FetchRequest, FetchResponse};
use crate::session::Session;
use crate::storage::{Scope, VERSION};

/// # Variant behaviour of a task.
///
/// Implementors hold no per-run state of their own; everything they need is
/// reachable through the [`Task`] they are handed.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use jobvisor::{Task, TaskError, TaskKind};
///
/// struct Follower;
///
/// #[async_trait]
/// impl TaskKind for Follower {
///     fn name(&self) -> &str { "followers" }
///
///     async fn run(&self, task: &Task) -> Result<(), TaskError> {
///         task.set_total(3);
///         for _page in 0..3 {
///             // fetch, extract, upsert...
///             task.step();
///         }
///         task.complete();
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait TaskKind: Send + Sync + 'static {
    /// Human-readable label.
    fn name(&self) -> &str;

    /// Fetches, extracts and stores this category's data.
    async fn run(&self, task: &Task) -> Result<(), TaskError>;
}

/// Borrowed services a task uses while it runs.
#[derive(Clone)]
pub struct Collaborators {
    pub fetch: Arc<Fetcher>,
    pub logger: Logger,
    pub scope: Arc<dyn Scope>,
    pub bus: Bus,
}

/// Everything [`Task::init`] injects.
#[derive(Clone)]
pub struct TaskContext {
    pub collaborators: Collaborators,
    pub job_id: Option<u64>,
    pub session: Option<Session>,
    pub target_user: Option<Value>,
    pub is_other_user: bool,
}

/// Serializable state of a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    #[serde(rename = "taskType")]
    pub tag: String,
    #[serde(default)]
    pub job_id: Option<u64>,
    #[serde(default)]
    pub session: Option<Session>,
    #[serde(default)]
    pub target_user: Option<Value>,
    #[serde(default)]
    pub is_other_user: bool,
    pub total: u64,
    #[serde(rename = "completion")]
    pub completed: u64,
}

#[derive(Default, Clone)]
struct Header {
    job_id: Option<u64>,
    session: Option<Session>,
    target_user: Option<Value>,
    is_other_user: bool,
}

#[derive(Clone, Copy)]
struct Progress {
    total: u64,
    completed: u64,
}

/// A task instance.
pub struct Task {
    tag: String,
    kind: Arc<dyn TaskKind>,
    header: RwLock<Header>,
    progress: Mutex<Progress>,
    collaborators: RwLock<Option<Collaborators>>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let p = *self.progress.lock();
        f.debug_struct("Task")
            .field("tag", &self.tag)
            .field("total", &p.total)
            .field("completed", &p.completed)
            .finish()
    }
}

impl Task {
    /// A fresh, uninitialized task.
    pub fn new(tag: impl Into<String>, kind: Arc<dyn TaskKind>) -> Self {
        Self {
            tag: tag.into(),
            kind,
            header: RwLock::new(Header::default()),
            progress: Mutex::new(Progress {
                total: 1,
                completed: 0,
            }),
            collaborators: RwLock::new(None),
        }
    }

    /// Rebuilds a task from its snapshot with fresh collaborators.
    pub(crate) fn restore(
        snapshot: TaskSnapshot,
        kind: Arc<dyn TaskKind>,
        collaborators: Collaborators,
    ) -> Self {
        let completed = snapshot.completed;
        Self {
            tag: snapshot.tag,
            kind,
            header: RwLock::new(Header {
                job_id: snapshot.job_id,
                session: snapshot.session,
                target_user: snapshot.target_user,
                is_other_user: snapshot.is_other_user,
            }),
            progress: Mutex::new(Progress {
                total: snapshot.total.max(completed).max(1),
                completed,
            }),
            collaborators: RwLock::new(Some(collaborators)),
        }
    }

    /// Injects collaborators and resets progress to `0 / 1`.
    pub fn init(&self, ctx: TaskContext) {
        *self.header.write() = Header {
            job_id: ctx.job_id,
            session: ctx.session,
            target_user: ctx.target_user,
            is_other_user: ctx.is_other_user,
        };
        *self.progress.lock() = Progress {
            total: 1,
            completed: 0,
        };
        *self.collaborators.write() = Some(ctx.collaborators);
    }

    /// Runs the variant.
    pub async fn run(&self) -> Result<(), TaskError> {
        self.kind.run(self).await
    }

    /// Registry tag, preserved even for unknown variants.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn name(&self) -> &str {
        self.kind.name()
    }

    pub fn job_id(&self) -> Option<u64> {
        self.header.read().job_id
    }

    pub fn session(&self) -> Option<Session> {
        self.header.read().session.clone()
    }

    pub fn target_user(&self) -> Option<Value> {
        self.header.read().target_user.clone()
    }

    pub fn is_other_user(&self) -> bool {
        self.header.read().is_other_user
    }

    pub fn total(&self) -> u64 {
        self.progress.lock().total
    }

    pub fn completed(&self) -> u64 {
        self.progress.lock().completed
    }

    /// True once every unit is done.
    pub fn is_complete(&self) -> bool {
        let p = self.progress.lock();
        p.completed >= p.total
    }

    /// One more unit done.
    pub fn step(&self) {
        self.update_progress(|p| {
            p.completed += 1;
            if p.completed > p.total {
                p.total = p.completed;
            }
        });
    }

    /// Marks every unit done.
    pub fn complete(&self) {
        self.update_progress(|p| p.completed = p.total);
    }

    /// Revises the unit count once pagination is known.
    pub fn set_total(&self, total: u64) {
        self.update_progress(|p| p.total = total.max(p.completed).max(1));
    }

    /// Applies `change`, then publishes the new counters if the task is bound.
    fn update_progress<F: FnOnce(&mut Progress)>(&self, change: F) {
        let p = {
            let mut p = self.progress.lock();
            change(&mut *p);
            *p
        };
        if let Some(c) = self.collaborators.read().as_ref() {
            c.bus.publish(Event::task_progress(
                self.name(),
                self.job_id(),
                p.completed,
                p.total,
            ));
        }
    }

    fn collaborators(&self) -> Result<Collaborators, TaskError> {
        self.collaborators
            .read()
            .clone()
            .ok_or_else(|| TaskError::Fail {
                error: format!("task {} used before init", self.tag),
            })
    }

    pub fn fetcher(&self) -> Result<Arc<Fetcher>, TaskError> {
        Ok(self.collaborators()?.fetch)
    }

    pub fn logger(&self) -> Result<Logger, TaskError> {
        Ok(self.collaborators()?.logger)
    }

    pub fn scope(&self) -> Result<Arc<dyn Scope>, TaskError> {
        Ok(self.collaborators()?.scope)
    }

    /// Gated, paced request through the injected fetcher.
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TaskError> {
        self.fetcher()?.fetch(request).await
    }

    /// Records `{table, version, updated}` for `table` in the local scope.
    pub async fn mark_version(&self, table: &str) -> Result<(), TaskError> {
        let record = json!({
            "table": table,
            "version": self.job_id(),
            "updated": Utc::now().timestamp_millis(),
        });
        self.scope()?.put(VERSION, table, record).await?;
        Ok(())
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        let header = self.header.read().clone();
        let p = *self.progress.lock();
        TaskSnapshot {
            tag: self.tag.clone(),
            job_id: header.job_id,
            session: header.session,
            target_user: header.target_user,
            is_other_user: header.is_other_user,
            total: p.total,
            completed: p.completed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Gate;
    use crate::error::FetchError;
    use crate::events::EventKind;
    use crate::logger::Level;
    use crate::net::Fetch;
    use crate::storage::{MemoryScope, Scope};

    struct Idle;

    #[async_trait]
    impl TaskKind for Idle {
        fn name(&self) -> &str {
            "idle"
        }

        async fn run(&self, _task: &Task) -> Result<(), TaskError> {
            Ok(())
        }
    }

    struct Offline;

    #[async_trait]
    impl Fetch for Offline {
        async fn fetch(&self, _request: FetchRequest) -> Result<FetchResponse, FetchError> {
            Err(FetchError::Transport {
                error: "offline".into(),
            })
        }
    }

    fn context(scope: Arc<dyn Scope>, job_id: u64) -> TaskContext {
        let bus = Bus::new(8);
        let gate = Arc::new(Gate::new(bus.clone()));
        TaskContext {
            collaborators: Collaborators {
                fetch: Arc::new(Fetcher::new(Arc::new(Offline), gate, None)),
                logger: Logger::new(bus.clone(), Level::Info, 0),
                scope,
                bus,
            },
            job_id: Some(job_id),
            session: None,
            target_user: None,
            is_other_user: false,
        }
    }

    #[test]
    fn step_then_complete() {
        let task = Task::new("idle", Arc::new(Idle));
        task.set_total(10);
        for _ in 0..4 {
            task.step();
        }
        assert_eq!(task.completed(), 4);
        assert!(!task.is_complete());

        task.complete();
        assert_eq!(task.completed(), task.total());
        assert_eq!(task.total(), 10);
    }

    #[test]
    fn total_never_shrinks_below_progress() {
        let task = Task::new("idle", Arc::new(Idle));
        task.set_total(5);
        task.step();
        task.step();
        task.set_total(1);
        assert_eq!(task.total(), 2);
        task.set_total(0);
        assert_eq!(task.total(), 2);

        let fresh = Task::new("idle", Arc::new(Idle));
        fresh.set_total(0);
        assert_eq!(fresh.total(), 1);
    }

    #[test]
    fn stepping_past_total_raises_it() {
        let task = Task::new("idle", Arc::new(Idle));
        task.step();
        task.step();
        assert_eq!((task.completed(), task.total()), (2, 2));
    }

    #[test]
    fn init_resets_progress() {
        let task = Task::new("idle", Arc::new(Idle));
        task.set_total(4);
        task.step();
        task.init(context(Arc::new(MemoryScope::new("t")), 3));
        assert_eq!((task.completed(), task.total()), (0, 1));
        assert_eq!(task.job_id(), Some(3));
    }

    #[tokio::test]
    async fn uninitialized_task_has_no_collaborators() {
        let task = Task::new("idle", Arc::new(Idle));
        let err = task.fetch(FetchRequest::get("https://example.com")).await;
        assert!(matches!(err, Err(TaskError::Fail { .. })));
    }

    #[test]
    fn progress_changes_are_published() {
        let task = Task::new("idle", Arc::new(Idle));
        let ctx = context(Arc::new(MemoryScope::new("local")), 3);
        let mut rx = ctx.collaborators.bus.subscribe();
        task.init(ctx);

        task.set_total(2);
        task.step();
        task.complete();

        let mut seen = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == EventKind::TaskProgress {
                assert_eq!(ev.task.as_deref(), Some("idle"));
                assert_eq!(ev.job, Some(3));
                seen.extend(ev.progress);
            }
        }
        assert_eq!(seen, [(0, 2), (1, 2), (2, 2)]);
    }

    #[tokio::test]
    async fn mark_version_writes_checkpoint_record() {
        let scope = Arc::new(MemoryScope::new("local"));
        scope.open().await.unwrap();
        let task = Task::new("idle", Arc::new(Idle));
        task.init(context(scope.clone(), 12));

        task.mark_version("note").await.unwrap();
        let record = scope.get(VERSION, "note").await.unwrap().unwrap();
        assert_eq!(record["table"], "note");
        assert_eq!(record["version"], 12);
        assert!(record["updated"].as_i64().unwrap() > 0);
    }

    #[test]
    fn snapshot_uses_checkpoint_field_names() {
        let task = Task::new("Note", Arc::new(Idle));
        task.set_total(3);
        task.step();
        let v = serde_json::to_value(task.snapshot()).unwrap();
        assert_eq!(v["taskType"], "Note");
        assert_eq!(v["total"], 3);
        assert_eq!(v["completion"], 1);
        assert_eq!(v["isOtherUser"], false);
    }
}
