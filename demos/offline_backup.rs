//! # Example: offline_backup
//!
//! Runs an offline backup job against a stored account, with a canned network
//! so it needs no browser session.
//!
//! Shows how to:
//! - Implement a [`TaskKind`] that pages through a listing and stores records.
//! - Register it in a [`TaskRegistry`] and build a [`Service`].
//! - Drive the service through a [`ServiceHandle`] and checkpoint it.
//!
//! ## Flow
//! ```text
//! handle.emit("job", {targetUserId, isOffline, tasks})
//!     └─► Service loop ──► Job::run()
//!           ├─► global scope: load account, add job record
//!           ├─► local scope: open
//!           └─► workers ──► Notes::run() ──► Fetcher (gated, paced) ──► CannedFetch
//! ```
//!
//! ## Run
//! ```bash
//! RUST_LOG=debug cargo run --example offline_backup
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jobvisor::storage::{ACCOUNT, JOB};
use jobvisor::{
    init_tracing, Config, Cookie, CookieJar, EventKind, Fetch, FetchError, FetchRequest,
    FetchResponse, LogWriter, MemoryStorage, Scope, Service, ServiceBuilder, Subscribe, Task,
    TaskError, TaskKind, TaskRegistry,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

const PAGES: u64 = 3;

/// Serves a fixed page of notes for any listing URL.
struct CannedFetch;

#[async_trait]
impl Fetch for CannedFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let page = request
            .url
            .rsplit('=')
            .next()
            .and_then(|p| p.parse::<u64>().ok())
            .unwrap_or(0);
        let body = json!({
            "total": PAGES * 2,
            "notes": [
                {"id": page * 2 + 1, "title": format!("note {}", page * 2 + 1)},
                {"id": page * 2 + 2, "title": format!("note {}", page * 2 + 2)},
            ],
        });
        Ok(FetchResponse::ok(request.url, body.to_string()))
    }
}

struct NoCookies;

#[async_trait]
impl CookieJar for NoCookies {
    async fn cookies(&self, _domain: &str) -> Result<Vec<Cookie>, FetchError> {
        Ok(Vec::new())
    }
}

/// Backs up the notes of the target user, one listing page per step.
struct Notes;

#[async_trait]
impl TaskKind for Notes {
    fn name(&self) -> &str {
        "Note"
    }

    async fn run(&self, task: &Task) -> Result<(), TaskError> {
        let logger = task.logger()?;
        let scope = task.scope()?;
        task.set_total(PAGES);

        for page in 0..PAGES {
            let url = format!("https://example.invalid/notes?start={page}");
            let listing: Value = task.fetch(FetchRequest::get(url)).await?.json()?;
            let notes = listing["notes"].as_array().cloned().unwrap_or_default();
            for note in notes {
                let key = note["id"].to_string();
                scope.put("note", &key, note).await?;
            }
            task.step();
            logger.info(format!("Note: page {}/{}", task.completed(), task.total()));
        }
        task.mark_version("note").await
    }
}

async fn seed(storage: &MemoryStorage) -> anyhow::Result<()> {
    let global = storage.global_scope();
    global.open().await?;
    global
        .put(
            ACCOUNT,
            "1000001",
            json!({
                "userId": 1000001,
                "username": "demo",
                "userSymbol": "demo",
                "cookies": null,
                "userInfo": {"id": "1000001", "name": "demo"},
                "updated": 1_700_000_000_000i64,
                "isOther": false,
            }),
        )
        .await?;
    global.close().await?;
    Ok(())
}

fn build(storage: Arc<MemoryStorage>) -> Arc<Service> {
    let mut registry = TaskRegistry::builtin();
    registry.register("Note", || Notes);

    let cfg = Config {
        request_interval: Duration::from_millis(200),
        ..Config::default()
    };
    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    ServiceBuilder::new(cfg)
        .with_subscribers(subs)
        .with_registry(registry)
        .build(Arc::new(CannedFetch), Arc::new(NoCookies), storage)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let storage = Arc::new(MemoryStorage::new());
    seed(&storage).await?;

    let service = build(storage.clone());
    let mut events = service.subscribe();
    let token = CancellationToken::new();
    let handle = service.handle(token.clone());
    let run_loop = service.spawn(token.clone());

    handle
        .emit(
            "job",
            json!({"targetUserId": 1000001, "isOffline": true, "tasks": ["Note"]}),
        )
        .await?;
    println!("[demo] checkpoint before start: {}", handle.save_state().await?.to_json()?);
    handle.start().await?;

    while let Ok(ev) = events.recv().await {
        match ev.kind {
            EventKind::UnitFinished => break,
            EventKind::UnitFailed => {
                println!("[demo] failed: {}", ev.reason.as_deref().unwrap_or("-"));
                break;
            }
            _ => {}
        }
    }

    let local = storage.local_scope("1000001");
    local.open().await?;
    println!("[demo] notes stored: {}", local.count("note").await?);
    local.close().await?;

    let global = storage.global_scope();
    global.open().await?;
    println!("[demo] job records: {}", global.count(JOB).await?);
    global.close().await?;

    token.cancel();
    run_loop.await?;
    service.shutdown();
    Ok(())
}
