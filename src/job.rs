//! # Job: one end-to-end backup run over a list of tasks.
//!
//! ```text
//! run()
//!   ├─ resolve identity ── offline? stored account : checkin() (+ target profile)
//!   ├─ global scope ────── upsert account, add job record → id, close
//!   ├─ local scope ─────── open for the whole run
//!   ├─ init tasks ──────── skip finished ones, enqueue the rest
//!   ├─ workers × N ─────── try_dequeue → currentTask → run (failures isolated)
//!   └─ teardown ────────── close local scope, clear currentTask, running = false
//! ```
//!
//! A task failure is logged and reported as `TaskFailed`; its siblings keep
//! going. Only identity and storage failures fail the job itself.
//!
//! The whole job is serializable at any time through [`Job::snapshot`], and
//! [`Job::from_snapshot`] rebuilds it with fresh collaborators.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::Mutex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::core::Context;
use crate::error::{catch_panic, SnapshotError, TaskError};
use crate::events::{Event, EventKind};
use crate::queue::BlockingQueue;
use crate::session::{checkin, fetch_user_info, Session};
use crate::storage::{Scope, ACCOUNT, JOB};
use crate::tasks::{Task, TaskContext, TaskSnapshot};

/// Arguments of a `"job"` request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    /// Back up another user (id or symbol) instead of the acting one.
    #[serde(default, deserialize_with = "opt_id")]
    pub target_user_id: Option<String>,
    /// Local scope to store into; defaults to the target user's id.
    #[serde(default, deserialize_with = "opt_id")]
    pub local_user_id: Option<String>,
    /// Run against previously stored data without checkin.
    #[serde(default, alias = "isOffline")]
    pub offline: bool,
    /// Task tags, in queue order.
    #[serde(default)]
    pub tasks: Vec<String>,
}

impl JobRequest {
    /// Parses request args: either the object itself or a one-element array.
    pub fn from_args(args: &Value) -> Result<Self, TaskError> {
        let object = match args {
            Value::Array(items) => items.first().cloned().unwrap_or_else(|| json!({})),
            Value::Null => json!({}),
            other => other.clone(),
        };
        serde_json::from_value(object).map_err(|e| TaskError::malformed(format!("job args: {e}")))
    }
}

/// Checkpoint form of a [`Job`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    #[serde(default, deserialize_with = "opt_id")]
    pub target_user_id: Option<String>,
    #[serde(default, deserialize_with = "opt_id")]
    pub local_user_id: Option<String>,
    pub tasks: Vec<TaskSnapshot>,
    #[serde(rename = "isOffline", default)]
    pub offline: bool,
    #[serde(rename = "_id", default)]
    pub id: Option<u64>,
    #[serde(rename = "_session", default)]
    pub session: Option<Session>,
    #[serde(rename = "_isRunning", default)]
    pub running: bool,
    #[serde(rename = "_currentTask", default)]
    pub current_task: Option<TaskSnapshot>,
}

impl JobSnapshot {
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(raw: &str) -> Result<Self, SnapshotError> {
        Ok(serde_json::from_str(raw)?)
    }
}

fn opt_id<'de, D>(de: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<Value>::deserialize(de)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(D::Error::custom(format!("invalid user id {other}"))),
    }
}

/// Who a run is for, once resolved.
struct Identity {
    user_id: String,
    account: Option<Session>,
    target_user: Option<Value>,
    is_other_user: bool,
}

pub struct Job {
    ctx: Arc<Context>,
    id: Mutex<Option<u64>>,
    target_user_id: Mutex<Option<String>>,
    local_user_id: Option<String>,
    offline: bool,
    tasks: Vec<Arc<Task>>,
    session: Mutex<Option<Session>>,
    current: Mutex<Option<Arc<Task>>>,
    running: AtomicBool,
}

impl Job {
    /// A pending job with one task per requested tag.
    pub fn new(ctx: Arc<Context>, request: JobRequest) -> Self {
        let tasks = request
            .tasks
            .iter()
            .map(|tag| Arc::new(ctx.registry.create(tag)))
            .collect();
        Self {
            ctx,
            id: Mutex::new(None),
            target_user_id: Mutex::new(request.target_user_id),
            local_user_id: request.local_user_id,
            offline: request.offline,
            tasks,
            session: Mutex::new(None),
            current: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    /// Appends a task to the queue order.
    pub fn add_task(&mut self, task: Task) {
        self.tasks.push(Arc::new(task));
    }

    /// Storage-assigned id, known once the job record exists.
    pub fn id(&self) -> Option<u64> {
        *self.id.lock()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    pub fn target_user_id(&self) -> Option<String> {
        self.target_user_id.lock().clone()
    }

    pub fn session(&self) -> Option<Session> {
        self.session.lock().clone()
    }

    pub fn tasks(&self) -> &[Arc<Task>] {
        &self.tasks
    }

    /// The task most recently picked by a worker.
    pub fn current_task(&self) -> Option<Arc<Task>> {
        self.current.lock().clone()
    }

    /// Runs the job to completion.
    ///
    /// Returns `Ok` also when an offline job finds no stored account (nothing
    /// to do) and when individual tasks fail.
    pub async fn run(&self) -> Result<(), TaskError> {
        self.running.store(true, Ordering::Release);
        let result = self.run_inner().await;
        *self.current.lock() = None;
        self.running.store(false, Ordering::Release);
        result
    }

    async fn run_inner(&self) -> Result<(), TaskError> {
        let logger = &self.ctx.logger;

        let Some(identity) = self.resolve_identity().await? else {
            return Ok(());
        };

        let global = self.ctx.storage.global();
        global.open().await?;
        logger.debug("Open global scope");
        let persisted = self.persist(global.as_ref(), &identity).await;
        global.close().await?;
        logger.debug("Close global scope");
        let Some((job_id, target_user)) = persisted? else {
            return Ok(());
        };
        *self.id.lock() = Some(job_id);

        let account = self
            .local_user_id
            .clone()
            .unwrap_or_else(|| identity.user_id.clone());
        let local = self.ctx.storage.local(&account);
        local.open().await?;
        logger.debug(format!("Open local scope for {account}"));

        let queue = BlockingQueue::new();
        let session = self.session();
        for task in &self.tasks {
            if task.is_complete() {
                logger.debug(format!("Skip finished task {}", task.name()));
                continue;
            }
            task.init(TaskContext {
                collaborators: self.ctx.collaborators(local.clone()),
                job_id: Some(job_id),
                session: session.clone(),
                target_user: target_user.clone(),
                is_other_user: identity.is_other_user,
            });
            queue.enqueue(task.clone());
        }

        self.ctx
            .bus
            .publish(Event::new(EventKind::JobStarted).with_job(Some(job_id)));
        let workers = (0..self.ctx.config.worker_count()).map(|_| self.work(&queue, job_id));
        join_all(workers).await;

        local.close().await?;
        logger.debug("Close local scope");
        self.ctx
            .bus
            .publish(Event::new(EventKind::JobFinished).with_job(Some(job_id)));
        Ok(())
    }

    async fn resolve_identity(&self) -> Result<Option<Identity>, TaskError> {
        let target = self.target_user_id();
        if self.offline {
            let Some(user_id) = target else {
                self.ctx.logger.warning("Offline job without a target user");
                return Ok(None);
            };
            return Ok(Some(Identity {
                user_id,
                account: None,
                target_user: None,
                is_other_user: true,
            }));
        }

        let ctx = &self.ctx;
        let session = checkin(&ctx.fetcher, ctx.cookies.as_ref(), &ctx.config.endpoints).await?;
        *self.session.lock() = Some(session.clone());

        let identity = match target {
            Some(target) => {
                let info =
                    fetch_user_info(&ctx.fetcher, &ctx.config.endpoints, &session.secrets, &target)
                        .await?;
                let account = Session::delegated(info.clone())?;
                let user_id = account.user_id.to_string();
                *self.target_user_id.lock() = Some(user_id.clone());
                Identity {
                    user_id,
                    account: Some(account),
                    target_user: Some(info),
                    is_other_user: true,
                }
            }
            None => Identity {
                user_id: session.user_id.to_string(),
                target_user: Some(session.user_info.clone()),
                account: Some(session),
                is_other_user: false,
            },
        };
        Ok(Some(identity))
    }

    /// Upserts the account (or loads it, offline) and adds the job record.
    ///
    /// `None` means an offline job found no stored account.
    async fn persist(
        &self,
        global: &dyn Scope,
        identity: &Identity,
    ) -> Result<Option<(u64, Option<Value>)>, TaskError> {
        let logger = &self.ctx.logger;
        let target_user = match &identity.account {
            Some(account) => {
                let value = serde_json::to_value(account).map_err(|e| TaskError::Fail {
                    error: e.to_string(),
                })?;
                global.put(ACCOUNT, &identity.user_id, value).await?;
                logger.debug("Create the account");
                identity.target_user.clone()
            }
            None => match global.get(ACCOUNT, &identity.user_id).await? {
                Some(stored) => stored.get("userInfo").cloned(),
                None => {
                    logger.debug("The account does not exist");
                    return Ok(None);
                }
            },
        };

        let user_id = identity
            .user_id
            .parse::<u64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::from(identity.user_id.clone()));
        let tasks: Vec<TaskSnapshot> = self.tasks.iter().map(|t| t.snapshot()).collect();
        let record = json!({
            "userId": user_id,
            "created": Utc::now().timestamp_millis(),
            "progress": {},
            "tasks": tasks,
        });
        let job_id = global.add(JOB, record).await?;
        logger.debug("Create the job");
        Ok(Some((job_id, target_user)))
    }

    async fn work(&self, queue: &BlockingQueue<Arc<Task>>, job_id: u64) {
        let bus = &self.ctx.bus;
        while let Some(task) = queue.try_dequeue() {
            *self.current.lock() = Some(task.clone());
            let name = task.name().to_string();
            bus.publish(
                Event::new(EventKind::TaskStarting)
                    .with_task(name.as_str())
                    .with_job(Some(job_id)),
            );

            match catch_panic(task.run()).await {
                Ok(()) => bus.publish(
                    Event::new(EventKind::TaskStopped)
                        .with_task(name.as_str())
                        .with_job(Some(job_id)),
                ),
                Err(e) => {
                    self.ctx
                        .logger
                        .error(format!("Fail to run task {name}: {e}"));
                    bus.publish(
                        Event::new(EventKind::TaskFailed)
                            .with_task(name.as_str())
                            .with_job(Some(job_id))
                            .with_reason(e.to_string()),
                    );
                }
            }
        }
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            target_user_id: self.target_user_id(),
            local_user_id: self.local_user_id.clone(),
            tasks: self.tasks.iter().map(|t| t.snapshot()).collect(),
            offline: self.offline,
            id: self.id(),
            session: self.session(),
            running: self.is_running(),
            current_task: self.current_task().map(|t| t.snapshot()),
        }
    }

    /// Rebuilds a job from its checkpoint with `ctx`'s collaborators.
    ///
    /// Tasks are bound to the local scope of the account the job was for.
    pub fn from_snapshot(snapshot: JobSnapshot, ctx: Arc<Context>) -> Self {
        let account = snapshot
            .local_user_id
            .clone()
            .or_else(|| snapshot.target_user_id.clone())
            .or_else(|| snapshot.session.as_ref().map(|s| s.user_id.to_string()));
        let scope = match &account {
            Some(account) => ctx.storage.local(account),
            None => ctx.storage.global(),
        };
        let restore = |s: TaskSnapshot| {
            Arc::new(
                ctx.registry
                    .from_snapshot(s, ctx.collaborators(scope.clone())),
            )
        };

        let tasks: Vec<Arc<Task>> = snapshot.tasks.iter().cloned().map(restore).collect();
        let current = snapshot.current_task.map(|c| {
            tasks
                .iter()
                .find(|t| t.snapshot() == c)
                .cloned()
                .unwrap_or_else(|| restore(c))
        });

        Self {
            id: Mutex::new(snapshot.id),
            target_user_id: Mutex::new(snapshot.target_user_id),
            local_user_id: snapshot.local_user_id,
            offline: snapshot.offline,
            tasks,
            session: Mutex::new(snapshot.session),
            current: Mutex::new(current),
            running: AtomicBool::new(snapshot.running),
            ctx,
        }
    }
}
