//! The client tracker against a live server, in detached-relay mode and in
//! queue mode with the worker reporting back.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use libsift::{Callbacks, ClientStatus, HttpResearchApi, ProgressTracker, ResearchApi};
use sift_core::config::WorkerMode;
use sift_core::ResearchError;

use crate::*;

const INTERVAL: Duration = Duration::from_millis(20);

async fn relay_server(script: &'static str) -> (FakeBackend, String) {
    let backend = FakeBackend::spawn(StreamReply::Sse(script), QueueReply::Accept("unused"))
        .await
        .unwrap();
    let base = spawn_sift(&config(&backend.url, WorkerMode::Relay)).await.unwrap();
    (backend, base)
}

async fn settled<A: ResearchApi>(tracker: &ProgressTracker<A>) -> ClientStatus {
    for _ in 0..200 {
        let status = tracker.status();
        if matches!(status, ClientStatus::Done | ClientStatus::Error) {
            return status;
        }
        tokio::time::sleep(INTERVAL).await;
    }
    tracker.status()
}

#[tokio::test]
async fn test_tracker_follows_task_to_report() {
    let (backend, base) = relay_server(SCENARIO_A).await;

    let reports = Arc::new(Mutex::new(Vec::new()));
    let sink = reports.clone();
    let callbacks = Callbacks::default().on_complete(move |r| sink.lock().unwrap().push(r));
    let tracker = ProgressTracker::new(
        HttpResearchApi::new(&base, "alice"),
        "chat-1",
        INTERVAL,
        callbacks,
    );

    tracker.start("solid state batteries").await;
    assert_eq!(settled(&tracker).await, ClientStatus::Done);

    let view = tracker.view();
    assert_eq!(view.report.as_deref(), Some("R"));
    assert_eq!(view.events.len(), 5);
    assert_eq!(*reports.lock().unwrap(), vec!["R".to_string()]);
    assert_eq!(backend.stream_calls(), 1);
    assert!(backend.jobs().is_empty(), "relay mode bypasses the HTTP queue");

    // Listing sees the same task, finished.
    let api = HttpResearchApi::new(&base, "alice");
    let tasks = api.list_tasks(10).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(Some(tasks[0].task_id.as_str()), view.task_id.as_deref());
    assert!(tasks[0].report_available);
}

#[tokio::test]
async fn test_tracker_surfaces_task_error() {
    let (_backend, base) = relay_server(FAILS_WITH_TIMEOUT).await;

    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    let callbacks = Callbacks::default().on_error(move |e| sink.lock().unwrap().push(e));
    let tracker = ProgressTracker::new(
        HttpResearchApi::new(&base, "alice"),
        "chat-1",
        INTERVAL,
        callbacks,
    );

    tracker.start("topic").await;
    assert_eq!(settled(&tracker).await, ClientStatus::Error);
    tokio::time::sleep(INTERVAL * 3).await;

    assert_eq!(
        *errors.lock().unwrap(),
        vec![ResearchError::TaskFailed("Timeout".into())]
    );
}

#[tokio::test]
async fn test_tracker_reports_rejected_create() {
    let (_backend, base) = relay_server(SCENARIO_A).await;

    let tracker = ProgressTracker::new(
        HttpResearchApi::new(&base, "alice"),
        "",
        INTERVAL,
        Callbacks::default(),
    );
    tracker.start("topic").await;

    let view = tracker.view();
    assert_eq!(view.status, ClientStatus::Error);
    assert_eq!(view.error, Some(ResearchError::Validation("Invalid chatId".into())));
    assert!(view.task_id.is_none());
}

#[tokio::test]
async fn test_tracker_follows_queued_worker_to_report() {
    let backend = FakeBackend::spawn(
        StreamReply::Status(500),
        QueueReply::AcceptAndReport("worker-7", SCENARIO_A),
    )
    .await
    .unwrap();
    let base = spawn_sift(&config(&backend.url, WorkerMode::Queue)).await.unwrap();

    let tracker = ProgressTracker::new(
        HttpResearchApi::new(&base, "alice"),
        "chat-1",
        INTERVAL,
        Callbacks::default(),
    );
    tracker.start("tidal energy").await;
    assert_eq!(settled(&tracker).await, ClientStatus::Done);

    let view = tracker.view();
    assert_eq!(view.report.as_deref(), Some("R"));
    assert_eq!(view.events.len(), 5);
    assert_eq!(backend.stream_calls(), 0, "queue mode never pulls the stream");

    let jobs = backend.jobs();
    assert_eq!(jobs.len(), 1);
    let task_id = view.task_id.clone().unwrap();
    assert_eq!(
        jobs[0]["eventsUrl"].as_str().unwrap(),
        format!("{}/research/tasks/{}/events", base, task_id)
    );

    for _ in 0..100 {
        if !backend.reports().is_empty() {
            break;
        }
        tokio::time::sleep(INTERVAL).await;
    }
    assert_eq!(backend.reports(), vec![200]);

    let task = api_get(&base, &format!("/research/tasks/{}", task_id), Some("alice"))
        .await
        .unwrap()
        .json();
    assert_eq!(task["status"], "completed");
    assert_eq!(task["queueInfo"]["workerId"], "worker-7");
}
