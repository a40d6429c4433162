mod support;

use jobvisor::storage::{ACCOUNT, JOB, VERSION};
use jobvisor::{
    Config, EventKind, FetchResponse, Job, JobRequest, JobSnapshot, RunLoopState, ServiceSnapshot,
    TaskSnapshot, UnitSnapshot, MOCK_URL,
};
use pretty_assertions::assert_eq;
use serde_json::json;

use support::{
    count, fast_config, read, registry_with, Boom, Harness, Pages, Tracker, ScriptedFetch,
    StaticCookies, IDENTITY_PAGE,
};

#[tokio::test]
async fn offline_job_bounds_concurrency_and_isolates_failures() {
    let tracker = Tracker::default();
    let registry = registry_with(|r| {
        let p = tracker.clone();
        r.register("Tracker", move || p.clone());
        r.register("Boom", || Boom);
    });
    let mut h = Harness::new(
        Config {
            max_concurrency: 3,
            ..fast_config()
        },
        registry,
    );
    h.seed_account(42).await;

    h.service.emit(
        "job",
        json!({
            "targetUserId": 42,
            "isOffline": true,
            "tasks": ["Tracker", "Tracker", "Boom", "Tracker", "Tracker"],
        }),
    );
    h.service.start().unwrap();

    let started = h.next(EventKind::JobStarted).await;
    let failed = h.next(EventKind::TaskFailed).await;
    assert_eq!(failed.task.as_deref(), Some("Boom"));
    assert_eq!(failed.job, started.job);
    h.next(EventKind::UnitFinished).await;

    assert_eq!(tracker.finished(), 4);
    assert!(tracker.peak() <= 3, "peak {} exceeds the pool", tracker.peak());
    assert!(tracker.peak() >= 2, "workers did not overlap");

    let global = h.storage.global_scope();
    assert_eq!(count(global.as_ref(), JOB).await, 1);
    let record = read(global.as_ref(), JOB, &started.job.unwrap().to_string())
        .await
        .unwrap();
    assert_eq!(record["userId"], json!(42));
    assert_eq!(record["tasks"].as_array().unwrap().len(), 5);

    assert!(h
        .service
        .logger()
        .entries()
        .iter()
        .any(|e| e.message == "Fail to run task Boom: execution failed: boom"));
    h.shutdown().await;
}

#[tokio::test]
async fn offline_job_without_stored_account_does_nothing() {
    let tracker = Tracker::default();
    let registry = registry_with(|r| {
        let p = tracker.clone();
        r.register("Tracker", move || p.clone());
    });
    let mut h = Harness::new(fast_config(), registry);

    h.service
        .emit("job", json!({"targetUserId": 7, "isOffline": true, "tasks": ["Tracker"]}));
    h.service.start().unwrap();
    h.next(EventKind::UnitFinished).await;

    assert_eq!(tracker.finished(), 0);
    assert_eq!(count(h.storage.global_scope().as_ref(), JOB).await, 0);
    h.shutdown().await;
}

#[tokio::test]
async fn online_job_checks_in_and_stores_the_account() {
    let fetch = ScriptedFetch::new();
    let endpoints = fast_config().endpoints;
    fetch.route(
        endpoints.identity_url.clone(),
        FetchResponse::ok(endpoints.identity_url.clone(), IDENTITY_PAGE),
    );
    fetch.route(
        "https://m.douban.com/rexxar/api/v2/user/1000001",
        FetchResponse::ok(
            "https://m.douban.com/rexxar/api/v2/user/1000001",
            r#"{"id": "1000001", "uid": "ahbei", "name": "阿北"}"#,
        ),
    );
    let cookies = StaticCookies::with(&[("ck", "tok"), ("dbcl2", "secret"), ("other", "x")]);
    let mut h = Harness::with_fetch(fast_config(), registry_with(|_| {}), fetch, cookies);

    h.service.emit("job", json!([{"tasks": ["Mock"]}]));
    h.service.start().unwrap();
    h.next(EventKind::UnitFinished).await;

    let urls = h.fetch.urls();
    assert_eq!(urls[0], endpoints.identity_url);
    assert!(urls[1].contains("/user/1000001?ck=tok"), "{}", urls[1]);
    assert_eq!(urls.last().map(String::as_str), Some(MOCK_URL));
    assert_eq!(
        h.fetch.requests()[1].headers.get("X-Override-Referer"),
        Some(&endpoints.user_info_referer)
    );

    let account = read(h.storage.global_scope().as_ref(), ACCOUNT, "1000001")
        .await
        .unwrap();
    assert_eq!(account["username"], "阿北");
    assert_eq!(account["userSymbol"], "ahbei");
    assert_eq!(account["cookies"]["ck"], "tok");
    assert_eq!(account["cookies"]["ue"], "");
    assert!(account["cookies"].get("other").is_none());
    assert_eq!(account["isOther"], false);
    h.shutdown().await;
}

#[tokio::test]
async fn redirected_checkin_fails_the_job_and_stops_the_loop() {
    let fetch = ScriptedFetch::new();
    let identity = fast_config().endpoints.identity_url;
    fetch.route(
        identity,
        FetchResponse {
            status: 200,
            url: "https://accounts.douban.com/passport/login".into(),
            redirected: true,
            body: String::new(),
        },
    );
    let mut h = Harness::with_fetch(
        fast_config(),
        registry_with(|_| {}),
        fetch,
        StaticCookies::with(&[]),
    );

    h.service.emit("job", json!({"tasks": ["Mock"]}));
    h.service.start().unwrap();

    let failed = h.next(EventKind::UnitFailed).await;
    assert_eq!(failed.request.as_deref(), Some("job"));
    assert_eq!(
        failed.reason.as_deref(),
        Some("not authenticated: redirected to https://accounts.douban.com/passport/login")
    );
    h.wait_state(RunLoopState::Stopped).await;
    assert_eq!(h.fetch.call_count(), 1);
    h.shutdown().await;
}

#[tokio::test]
async fn job_snapshot_survives_a_json_round_trip() {
    let h = Harness::new(fast_config(), registry_with(|r| {
        r.register("Pages", || Pages { pages: 2 });
    }));
    let ctx = h.service.context().clone();

    let request = JobRequest {
        target_user_id: Some("42".into()),
        local_user_id: Some("local-1".into()),
        offline: true,
        tasks: vec!["Pages".into(), "Mock".into(), "Missing".into()],
    };
    let job = Job::new(ctx.clone(), request);
    job.tasks()[0].set_total(5);
    job.tasks()[0].step();
    job.tasks()[0].step();

    let raw = job.snapshot().to_json().unwrap();
    let back = JobSnapshot::from_json(&raw).unwrap();
    let restored = Job::from_snapshot(back, ctx);

    assert_eq!(restored.snapshot(), job.snapshot());
    let order: Vec<&str> = restored.tasks().iter().map(|t| t.tag()).collect();
    assert_eq!(order, ["Pages", "Mock", "Missing"]);
    assert_eq!(restored.tasks()[0].completed(), 2);
    assert_eq!(restored.tasks()[0].total(), 5);
    assert!(restored.is_offline());
    assert!(!restored.is_running());
    h.shutdown().await;
}

#[tokio::test]
async fn online_job_snapshot_keeps_id_and_session_across_json() {
    let fetch = ScriptedFetch::new();
    let endpoints = fast_config().endpoints;
    fetch.route(
        endpoints.identity_url.clone(),
        FetchResponse::ok(endpoints.identity_url.clone(), IDENTITY_PAGE),
    );
    fetch.route(
        "https://m.douban.com/rexxar/api/v2/user/1000001",
        FetchResponse::ok(
            "https://m.douban.com/rexxar/api/v2/user/1000001",
            r#"{"id": "1000001", "uid": "ahbei", "name": "阿北"}"#,
        ),
    );
    let cookies = StaticCookies::with(&[("ck", "tok")]);
    let h = Harness::with_fetch(fast_config(), registry_with(|_| {}), fetch, cookies);
    h.service.start().unwrap();
    h.wait_state(RunLoopState::Running).await;

    let ctx = h.service.context().clone();
    let request = JobRequest {
        target_user_id: None,
        local_user_id: None,
        offline: false,
        tasks: vec!["Mock".into()],
    };
    let job = Job::new(ctx.clone(), request);
    job.run().await.unwrap();

    let before = job.snapshot();
    assert!(before.id.is_some());
    assert_eq!(before.session.as_ref().map(|s| s.user_id), Some(1000001));

    let raw = before.to_json().unwrap();
    let after = Job::from_snapshot(JobSnapshot::from_json(&raw).unwrap(), ctx).snapshot();
    assert_eq!(after.session, before.session);
    assert_eq!(after, before);
    h.shutdown().await;
}

#[tokio::test]
async fn restored_job_skips_finished_tasks() {
    let tracker = Tracker::default();
    let registry = registry_with(|r| {
        let p = tracker.clone();
        r.register("Tracker", move || p.clone());
        r.register("Pages", || Pages { pages: 3 });
    });
    let mut h = Harness::new(fast_config(), registry);
    h.seed_account(42).await;

    let task = |tag: &str, total, completed| TaskSnapshot {
        tag: tag.into(),
        job_id: Some(9),
        session: None,
        target_user: None,
        is_other_user: true,
        total,
        completed,
    };
    let snapshot = ServiceSnapshot {
        pending: vec![],
        current: Some(UnitSnapshot::Job(JobSnapshot {
            target_user_id: Some("42".into()),
            local_user_id: None,
            tasks: vec![task("Tracker", 1, 1), task("Pages", 3, 1), task("Tracker", 1, 0)],
            offline: true,
            id: Some(9),
            session: None,
            running: true,
            current_task: Some(task("Pages", 3, 1)),
        })),
    };
    h.service.restore(snapshot).unwrap();
    h.service.start().unwrap();
    h.next(EventKind::UnitFinished).await;

    // one of two trackers was already done; Pages restarts from zero
    assert_eq!(tracker.finished(), 1);
    let pages: Vec<String> = h
        .fetch
        .urls()
        .into_iter()
        .filter(|u| u.contains("/page/"))
        .collect();
    assert_eq!(pages.len(), 3);

    let local = h.storage.local_scope("42");
    let version = read(local.as_ref(), VERSION, "pages").await.unwrap();
    assert_eq!(version["table"], "pages");
    assert_eq!(h.service.save_state().current, None);
    h.shutdown().await;
}

#[tokio::test]
async fn job_snapshot_while_idle_reports_no_current_task() {
    let h = Harness::new(fast_config(), registry_with(|_| {}));
    let job = Job::new(
        h.service.context().clone(),
        JobRequest::from_args(&json!({"tasks": ["Mock"]})).unwrap(),
    );
    let snapshot = job.snapshot();
    assert_eq!(snapshot.current_task, None);
    assert_eq!(snapshot.id, None);
    assert_eq!(snapshot.tasks.len(), 1);
    h.shutdown().await;
}
