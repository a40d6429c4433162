#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jobvisor::{
    Config, Cookie, CookieJar, Event, EventKind, Fetch, FetchError, FetchRequest, FetchResponse,
    MemoryStorage, RunLoopState, Scope, Service, ServiceBuilder, Task, TaskError, TaskKind,
    TaskRegistry,
};
use jobvisor::storage::ACCOUNT;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const WAIT: Duration = Duration::from_secs(60);

/// Fetch stand-in answering by longest matching URL prefix.
///
/// Unrouted URLs get an empty `200 OK`.
#[derive(Default)]
pub struct ScriptedFetch {
    routes: Mutex<Vec<(String, FetchResponse)>>,
    calls: Mutex<Vec<(FetchRequest, Instant)>>,
}

impl ScriptedFetch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn route(&self, prefix: impl Into<String>, response: FetchResponse) {
        self.routes.lock().push((prefix.into(), response));
    }

    pub fn urls(&self) -> Vec<String> {
        self.calls.lock().iter().map(|(r, _)| r.url.clone()).collect()
    }

    pub fn requests(&self) -> Vec<FetchRequest> {
        self.calls.lock().iter().map(|(r, _)| r.clone()).collect()
    }

    pub fn dispatched_at(&self) -> Vec<Instant> {
        self.calls.lock().iter().map(|(_, at)| *at).collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl Fetch for ScriptedFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let response = self
            .routes
            .lock()
            .iter()
            .filter(|(prefix, _)| request.url.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, response)| response.clone())
            .unwrap_or_else(|| FetchResponse::ok(request.url.clone(), ""));
        self.calls.lock().push((request, Instant::now()));
        Ok(response)
    }
}

#[derive(Default)]
pub struct StaticCookies(pub Vec<Cookie>);

impl StaticCookies {
    pub fn with(pairs: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self(
            pairs
                .iter()
                .map(|(name, value)| Cookie {
                    name: name.to_string(),
                    value: value.to_string(),
                    domain: ".douban.com".to_string(),
                })
                .collect(),
        ))
    }
}

#[async_trait]
impl CookieJar for StaticCookies {
    async fn cookies(&self, _domain: &str) -> Result<Vec<Cookie>, FetchError> {
        Ok(self.0.clone())
    }
}

/// Counts concurrent runs and remembers the peak.
#[derive(Clone, Default)]
pub struct Tracker {
    pub active: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub finished: Arc<AtomicUsize>,
}

impl Tracker {
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskKind for Tracker {
    fn name(&self) -> &str {
        "Tracker"
    }

    async fn run(&self, task: &Task) -> Result<(), TaskError> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        task.complete();
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Always fails.
pub struct Boom;

#[async_trait]
impl TaskKind for Boom {
    fn name(&self) -> &str {
        "Boom"
    }

    async fn run(&self, _task: &Task) -> Result<(), TaskError> {
        Err(TaskError::Fail {
            error: "boom".into(),
        })
    }
}

pub struct Panics;

#[async_trait]
impl TaskKind for Panics {
    fn name(&self) -> &str {
        "Panics"
    }

    async fn run(&self, _task: &Task) -> Result<(), TaskError> {
        panic!("task blew up")
    }
}

/// Fetches `pages` URLs, one progress step each.
pub struct Pages {
    pub pages: u64,
}

#[async_trait]
impl TaskKind for Pages {
    fn name(&self) -> &str {
        "Pages"
    }

    async fn run(&self, task: &Task) -> Result<(), TaskError> {
        task.set_total(self.pages);
        for page in 0..self.pages {
            task.fetch(FetchRequest::get(format!("https://foo.bar/page/{page}")))
                .await?;
            task.step();
        }
        task.mark_version("pages").await
    }
}

/// Appends its tag to a shared log.
#[derive(Clone, Default)]
pub struct Recorder {
    pub seen: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl TaskKind for Recorder {
    fn name(&self) -> &str {
        "Recorder"
    }

    async fn run(&self, task: &Task) -> Result<(), TaskError> {
        self.seen.lock().push(task.tag().to_string());
        task.complete();
        Ok(())
    }
}

/// Parks until released, then issues one request.
#[derive(Clone, Default)]
pub struct Latch {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[async_trait]
impl TaskKind for Latch {
    fn name(&self) -> &str {
        "Latch"
    }

    async fn run(&self, task: &Task) -> Result<(), TaskError> {
        self.entered.notify_one();
        self.release.notified().await;
        task.fetcher()?.get("https://foo.bar/latch").await?;
        task.complete();
        Ok(())
    }
}

/// Config with pacing disabled.
pub fn fast_config() -> Config {
    Config {
        request_interval: Duration::ZERO,
        ..Config::default()
    }
}

/// A built service with its collaborators and a spawned run-loop.
pub struct Harness {
    pub service: Arc<Service>,
    pub storage: Arc<MemoryStorage>,
    pub fetch: Arc<ScriptedFetch>,
    pub events: broadcast::Receiver<Event>,
    pub token: CancellationToken,
    pub run_loop: JoinHandle<()>,
}

impl Harness {
    pub fn new(cfg: Config, registry: TaskRegistry) -> Self {
        Self::with_fetch(cfg, registry, ScriptedFetch::new(), StaticCookies::with(&[]))
    }

    pub fn with_fetch(
        cfg: Config,
        registry: TaskRegistry,
        fetch: Arc<ScriptedFetch>,
        cookies: Arc<dyn CookieJar>,
    ) -> Self {
        let storage = Arc::new(MemoryStorage::new());
        let service = ServiceBuilder::new(cfg)
            .with_registry(registry)
            .build(fetch.clone(), cookies, storage.clone());
        let events = service.subscribe();
        let token = CancellationToken::new();
        let run_loop = service.spawn(token.clone());
        Self {
            service,
            storage,
            fetch,
            events,
            token,
            run_loop,
        }
    }

    /// Stores an account the way an earlier online run would have.
    pub async fn seed_account(&self, user_id: u64) {
        let global = self.storage.global_scope();
        global.open().await.unwrap();
        global
            .put(
                ACCOUNT,
                &user_id.to_string(),
                json!({
                    "userId": user_id,
                    "username": "seeded",
                    "userSymbol": "seeded",
                    "cookies": null,
                    "userInfo": {"id": user_id.to_string(), "name": "seeded"},
                    "updated": 1_700_000_000_000i64,
                    "isOther": true,
                }),
            )
            .await
            .unwrap();
        global.close().await.unwrap();
    }

    /// Waits for the next event of `kind`.
    pub async fn next(&mut self, kind: EventKind) -> Event {
        next_event(&mut self.events, kind).await
    }

    pub async fn wait_state(&self, state: RunLoopState) {
        let mut rx = self.service.watch_state();
        tokio::time::timeout(WAIT, rx.wait_for(|s| *s == state))
            .await
            .expect("timed out waiting for state")
            .expect("gate dropped");
    }

    pub async fn shutdown(self) {
        self.token.cancel();
        self.run_loop.await.unwrap();
        self.service.shutdown();
    }
}

pub async fn next_event(rx: &mut broadcast::Receiver<Event>, kind: EventKind) -> Event {
    let wait = async {
        loop {
            match rx.recv().await {
                Ok(ev) if ev.kind == kind => return ev,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("bus closed"),
            }
        }
    };
    tokio::time::timeout(WAIT, wait)
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {kind:?}"))
}

/// Reads one record from a closed-between-uses scope.
pub async fn read(scope: &dyn Scope, collection: &str, key: &str) -> Option<Value> {
    scope.open().await.unwrap();
    let value = scope.get(collection, key).await.unwrap();
    scope.close().await.unwrap();
    value
}

pub async fn count(scope: &dyn Scope, collection: &str) -> usize {
    scope.open().await.unwrap();
    let n = scope.count(collection).await.unwrap();
    scope.close().await.unwrap();
    n
}

/// Identity page for user `1000001` / `ahbei`.
pub const IDENTITY_PAGE: &str = r#"
    <div class="basic-info"><a href="https://m.douban.com/people/ahbei/">ahbei</a></div>
    <input type="hidden" id="user" data-name="阿北" value="1000001">
"#;

pub fn registry_with(extra: impl FnOnce(&mut TaskRegistry)) -> TaskRegistry {
    let mut registry = TaskRegistry::builtin();
    extra(&mut registry);
    registry
}
