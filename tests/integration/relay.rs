//! Live relay through `POST /api/research/stream`.

use std::time::Duration;

use serde_json::{json, Value};

use sift_core::config::WorkerMode;

use crate::*;

fn event_types(task: &Value) -> Vec<String> {
    task["progress"]["events"]
        .as_array()
        .map(|events| {
            events
                .iter()
                .filter_map(|e| e["type"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[tokio::test]
async fn test_stream_relays_and_persists_full_run() {
    let backend = FakeBackend::spawn(StreamReply::Sse(SCENARIO_A), QueueReply::Accept("w-1"))
        .await
        .unwrap();
    let base = spawn_sift(&config(&backend.url, WorkerMode::Queue)).await.unwrap();

    let resp = api_post(
        &base,
        "/research/stream",
        Some("alice"),
        &json!({ "prompt": "solid state batteries", "chatId": "chat-1" }),
    )
    .await
    .unwrap();

    assert_eq!(resp.status, 200);
    assert!(resp.content_type.starts_with("text/event-stream"), "{}", resp.content_type);

    let frames = resp.frames();
    let names: Vec<&str> = frames.iter().map(|(e, _)| e.as_str()).collect();
    assert_eq!(names, ["start", "plan", "progress", "progress", "done"]);

    let (_, done) = &frames[4];
    assert_eq!(done["report"], "R");
    assert_eq!(done["chatId"], "chat-1");
    assert_eq!(done["userId"], "alice");
    let task_id = done["taskId"].as_str().expect("done frame carries taskId").to_string();

    let task = wait_for_task(&base, "alice", &task_id, |t| t["status"] == "completed")
        .await
        .unwrap();
    assert_eq!(task["report"], "R");
    assert_eq!(task["progress"]["totalSteps"], 2);
    assert_eq!(task["progress"]["completedSteps"], 2);
    assert_eq!(
        event_types(&task),
        ["start", "plan", "progress", "progress", "done"]
    );
    assert!(task["startedAt"].is_string());
    assert!(task["completedAt"].is_string());
    assert_eq!(backend.stream_calls(), 1);
}

#[tokio::test]
async fn test_finished_task_resumes_as_snapshot() {
    let backend = FakeBackend::spawn(StreamReply::Sse(SCENARIO_A), QueueReply::Accept("w-1"))
        .await
        .unwrap();
    let base = spawn_sift(&config(&backend.url, WorkerMode::Queue)).await.unwrap();

    let first = api_post(
        &base,
        "/research/stream",
        Some("alice"),
        &json!({ "prompt": "topic", "chatId": "chat-1" }),
    )
    .await
    .unwrap();
    let task_id = first.frames()[0].1["taskId"].as_str().unwrap().to_string();
    wait_for_task(&base, "alice", &task_id, |t| t["status"] == "completed")
        .await
        .unwrap();

    let again = api_post(&base, "/research/stream", Some("alice"), &json!({ "taskId": task_id }))
        .await
        .unwrap();
    assert_eq!(again.status, 200);
    assert!(again.content_type.starts_with("application/json"));
    let snapshot = again.json();
    assert_eq!(snapshot["status"], "completed");
    assert_eq!(snapshot["report"], "R");
    assert_eq!(backend.stream_calls(), 1, "finished task must not reopen upstream");

    // Someone else's task looks missing.
    let foreign = api_post(&base, "/research/stream", Some("bob"), &json!({ "taskId": task_id }))
        .await
        .unwrap();
    assert_eq!(foreign.status, 404);
}

#[tokio::test]
async fn test_non_stream_backend_fails_task() {
    let backend = FakeBackend::spawn(
        StreamReply::Json(json!({ "ok": true })),
        QueueReply::Accept("w-1"),
    )
    .await
    .unwrap();
    let base = spawn_sift(&config(&backend.url, WorkerMode::Queue)).await.unwrap();

    let resp = api_post(
        &base,
        "/research/stream",
        Some("alice"),
        &json!({ "prompt": "topic", "chatId": "chat-1" }),
    )
    .await
    .unwrap();
    assert_eq!(resp.status, 502);
    let body = resp.json();
    assert_eq!(body["error"], "Backend did not return SSE stream");
    let task_id = body["taskId"].as_str().unwrap().to_string();

    let task = wait_for_task(&base, "alice", &task_id, |t| t["status"] == "failed")
        .await
        .unwrap();
    assert_eq!(event_types(&task), ["error"]);
    assert!(task["failedAt"].is_string());
    assert_eq!(backend.stream_calls(), 1, "protocol faults are not retried");
}

#[tokio::test]
async fn test_backend_error_status_is_passed_through() {
    let backend = FakeBackend::spawn(StreamReply::Status(500), QueueReply::Accept("w-1"))
        .await
        .unwrap();
    let base = spawn_sift(&config(&backend.url, WorkerMode::Queue)).await.unwrap();

    let resp = api_post(
        &base,
        "/research/stream",
        Some("alice"),
        &json!({ "prompt": "topic", "chatId": "chat-1" }),
    )
    .await
    .unwrap();
    assert_eq!(resp.status, 500);
    assert_eq!(resp.json()["error"], "Backend error: Internal Server Error");
    assert_eq!(backend.stream_calls(), 1);
}

#[tokio::test]
async fn test_unreachable_backend_exhausts_retries() {
    let dead = closed_port_url().await.unwrap();
    let base = spawn_sift(&config(&dead, WorkerMode::Queue)).await.unwrap();

    let resp = api_post(
        &base,
        "/research/stream",
        Some("alice"),
        &json!({ "prompt": "topic", "chatId": "chat-1" }),
    )
    .await
    .unwrap();
    assert_eq!(resp.status, 502);
    let body = resp.json();
    assert_eq!(body["error"], "Failed to connect to research backend");
    assert!(body["backend"].as_str().unwrap().starts_with(&dead));
    let task_id = body["taskId"].as_str().unwrap().to_string();

    let task = api_get(&base, &format!("/research/tasks/{}", task_id), Some("alice"))
        .await
        .unwrap()
        .json();
    assert_eq!(task["status"], "queued");
    assert_eq!(
        event_types(&task),
        ["connection_error", "connection_error", "connection_error"]
    );
}

#[tokio::test]
async fn test_stream_rejects_bad_input() {
    let backend = FakeBackend::spawn(StreamReply::Sse(SCENARIO_A), QueueReply::Accept("w-1"))
        .await
        .unwrap();
    let base = spawn_sift(&config(&backend.url, WorkerMode::Queue)).await.unwrap();

    let anonymous = api_post(&base, "/research/stream", None, &json!({ "prompt": "x" }))
        .await
        .unwrap();
    assert_eq!(anonymous.status, 401);

    let empty = api_post(
        &base,
        "/research/stream",
        Some("alice"),
        &json!({ "prompt": "   ", "chatId": "chat-1" }),
    )
    .await
    .unwrap();
    assert_eq!(empty.status, 400);
    assert_eq!(empty.json()["error"], "Invalid prompt");
    assert_eq!(backend.stream_calls(), 0);
}

const SCENARIO_A_FRAMES: &[&str] = &[
    "event: start\ndata: {}\n\n",
    "event: plan\ndata: {\"steps\":[\"a\",\"b\"]}\n\n",
    "event: progress\ndata: {\"step\":1,\"total\":2}\n\n",
    "event: progress\ndata: {\"step\":2,\"total\":2}\n\n",
    "event: done\ndata: {\"report\":\"R\"}\n\n",
];

#[tokio::test]
async fn test_resume_while_live_follows_the_running_relay() {
    let backend = FakeBackend::spawn(
        StreamReply::Trickle(SCENARIO_A_FRAMES, Duration::from_millis(150)),
        QueueReply::Accept("w-1"),
    )
    .await
    .unwrap();
    let base = spawn_sift(&config(&backend.url, WorkerMode::Queue)).await.unwrap();

    let mut owner = reqwest::Client::new()
        .post(format!("{}/research/stream", base))
        .header("x-user-id", "alice")
        .json(&json!({ "prompt": "solid state batteries", "chatId": "chat-1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(owner.status().as_u16(), 200);

    // The first frame names the task.
    let mut seen = String::new();
    while !seen.contains("\n\n") {
        let chunk = owner.chunk().await.unwrap().expect("owner stream ended early");
        seen.push_str(&String::from_utf8_lossy(&chunk));
    }
    let first = Reply {
        status: 200,
        content_type: "text/event-stream".into(),
        text: seen.clone(),
    };
    let task_id = first.frames()[0].1["taskId"].as_str().unwrap().to_string();

    let follower = api_post(
        &base,
        "/research/stream",
        Some("alice"),
        &json!({ "taskId": task_id }),
    )
    .await
    .unwrap();
    assert_eq!(follower.status, 200);
    assert!(follower.content_type.starts_with("text/event-stream"));
    let followed: Vec<String> = follower.frames().into_iter().map(|(e, _)| e).collect();
    assert_eq!(followed.last().map(String::as_str), Some("done"));
    assert!(followed.len() < 5, "follower only sees frames after it joined");

    while let Some(chunk) = owner.chunk().await.unwrap() {
        seen.push_str(&String::from_utf8_lossy(&chunk));
    }
    assert!(seen.contains("event: done"));

    assert_eq!(backend.stream_calls(), 1, "no second upstream for a live task");
    let task = wait_for_task(&base, "alice", &task_id, |t| t["status"] == "completed")
        .await
        .unwrap();
    assert_eq!(
        event_types(&task),
        ["start", "plan", "progress", "progress", "done"]
    );
    assert_eq!(task["report"], "R");
}
