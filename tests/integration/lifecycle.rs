//! Task creation, ownership and listing through `/api/research/tasks`.

use serde_json::json;

use sift_core::config::WorkerMode;

use crate::*;

async fn queue_server(queue: QueueReply) -> (FakeBackend, String) {
    let backend = FakeBackend::spawn(StreamReply::Sse(SCENARIO_A), queue).await.unwrap();
    let base = spawn_sift(&config(&backend.url, WorkerMode::Queue)).await.unwrap();
    (backend, base)
}

#[tokio::test]
async fn test_create_hands_task_to_worker() {
    let (backend, base) = queue_server(QueueReply::Accept("w-1")).await;

    let resp = api_post(
        &base,
        "/research/tasks",
        Some("alice"),
        &json!({ "prompt": "  sodium ion cells ", "chatId": "chat-1", "model": "deep" }),
    )
    .await
    .unwrap();
    assert_eq!(resp.status, 202);
    let body = resp.json();
    assert_eq!(body["status"], "queued");
    let task_id = body["taskId"].as_str().unwrap().to_string();

    let jobs = backend.jobs();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["taskId"], task_id.as_str());
    assert_eq!(jobs[0]["prompt"], "sodium ion cells");
    assert_eq!(jobs[0]["model"], "deep");

    let task = wait_for_task(&base, "alice", &task_id, |t| {
        t["queueInfo"]["workerId"] == "w-1"
    })
    .await
    .unwrap();
    assert_eq!(task["status"], "queued");
    assert_eq!(task["topic"], "sodium ion cells");
    assert_eq!(task["chatId"], "chat-1");
    assert!(task["queueInfo"]["enqueuedAt"].is_string());
    // Queue mode never opens the stream itself.
    assert_eq!(backend.stream_calls(), 0);
}

#[tokio::test]
async fn test_create_validates_input() {
    let (backend, base) = queue_server(QueueReply::Accept("w-1")).await;

    let anonymous = api_post(&base, "/research/tasks", None, &json!({ "prompt": "x", "chatId": "c" }))
        .await
        .unwrap();
    assert_eq!(anonymous.status, 401);

    let no_prompt = api_post(&base, "/research/tasks", Some("alice"), &json!({ "chatId": "c" }))
        .await
        .unwrap();
    assert_eq!(no_prompt.status, 400);
    assert_eq!(no_prompt.json()["error"], "Invalid prompt");

    let no_chat = api_post(&base, "/research/tasks", Some("alice"), &json!({ "prompt": "x" }))
        .await
        .unwrap();
    assert_eq!(no_chat.status, 400);
    assert_eq!(no_chat.json()["error"], "Invalid chatId");

    assert!(backend.jobs().is_empty());
}

#[tokio::test]
async fn test_foreign_chat_is_forbidden() {
    let (backend, base) = queue_server(QueueReply::Accept("w-1")).await;

    let mine = api_post(
        &base,
        "/research/tasks",
        Some("alice"),
        &json!({ "prompt": "topic", "chatId": "shared" }),
    )
    .await
    .unwrap();
    assert_eq!(mine.status, 202);

    let theirs = api_post(
        &base,
        "/research/tasks",
        Some("bob"),
        &json!({ "prompt": "topic", "chatId": "shared" }),
    )
    .await
    .unwrap();
    assert_eq!(theirs.status, 403);
    let body = theirs.json();
    assert_eq!(body["error"], "Forbidden");
    assert_eq!(body["message"], "You do not have access to this chat");
    assert_eq!(backend.jobs().len(), 1);
}

#[tokio::test]
async fn test_tasks_are_private_to_their_owner() {
    let (_backend, base) = queue_server(QueueReply::Accept("w-1")).await;

    let created = api_post(
        &base,
        "/research/tasks",
        Some("alice"),
        &json!({ "prompt": "topic", "chatId": "chat-1" }),
    )
    .await
    .unwrap()
    .json();
    let path = format!("/research/tasks/{}", created["taskId"].as_str().unwrap());

    assert_eq!(api_get(&base, &path, Some("alice")).await.unwrap().status, 200);

    let foreign = api_get(&base, &path, Some("bob")).await.unwrap();
    assert_eq!(foreign.status, 404);
    assert_eq!(foreign.json()["error"], "Research task not found");

    let missing = api_get(&base, "/research/tasks/nope", Some("alice")).await.unwrap();
    assert_eq!(missing.status, 404);
}

#[tokio::test]
async fn test_queue_rejection_fails_task() {
    let (_backend, base) = queue_server(QueueReply::Reject(503, "no workers")).await;

    let resp = api_post(
        &base,
        "/research/tasks",
        Some("alice"),
        &json!({ "prompt": "topic", "chatId": "chat-1" }),
    )
    .await
    .unwrap();
    assert_eq!(resp.status, 502);
    let body = resp.json();
    assert_eq!(body["error"], "Failed to queue research task");
    assert_eq!(body["message"], "no workers");

    let list = api_get(&base, "/research/tasks", Some("alice")).await.unwrap().json();
    let tasks = list["tasks"].as_array().unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0]["status"], "failed");

    let task_id = tasks[0]["taskId"].as_str().unwrap();
    let task = api_get(&base, &format!("/research/tasks/{}", task_id), Some("alice"))
        .await
        .unwrap()
        .json();
    let events = task["progress"]["events"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "error");
    assert_eq!(
        events[0]["message"],
        "Failed to queue research task: no workers"
    );
}

#[tokio::test]
async fn test_list_is_newest_first_and_limited() {
    let (_backend, base) = queue_server(QueueReply::Accept("w-1")).await;

    let mut ids = Vec::new();
    for topic in ["first", "second", "third"] {
        let created = api_post(
            &base,
            "/research/tasks",
            Some("alice"),
            &json!({ "prompt": topic, "chatId": "chat-1" }),
        )
        .await
        .unwrap()
        .json();
        ids.push(created["taskId"].as_str().unwrap().to_string());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }

    let two = api_get(&base, "/research/tasks?limit=2", Some("alice")).await.unwrap().json();
    let two = two["tasks"].as_array().unwrap();
    assert_eq!(two.len(), 2);
    assert_eq!(two[0]["taskId"], ids[2].as_str());
    assert_eq!(two[1]["taskId"], ids[1].as_str());

    let garbage = api_get(&base, "/research/tasks?limit=lots", Some("alice"))
        .await
        .unwrap()
        .json();
    assert_eq!(garbage["tasks"].as_array().unwrap().len(), 3);

    let bobs = api_get(&base, "/research/tasks", Some("bob")).await.unwrap().json();
    assert!(bobs["tasks"].as_array().unwrap().is_empty());
}
