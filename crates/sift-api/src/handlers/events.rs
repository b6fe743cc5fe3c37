//! /research/tasks/{task_id}/events handler — a queued worker pushes its
//! event stream back here.
//!
//! The body is the same SSE stream the relay would otherwise pull from the
//! backend, so it runs through the same relay: projected, persisted, and
//! fanned out to anyone following the task. There is no user on this
//! route; the caller is the worker the task was handed to.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use futures::StreamExt;
use serde_json::{json, Value};

use sift_core::TaskId;
use sift_services::{Attached, UpstreamBody};

use super::{reject, ApiError, ApiState};

pub async fn handle_task_events(
    State(state): State<ApiState>,
    Path(task_id): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let task_id = TaskId::parse(&task_id).map_err(reject)?;

    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.contains("text/event-stream") {
        return Err((
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Json(json!({
                "error": "Expected an event stream",
                "details": content_type,
            })),
        ));
    }

    let task = state.lifecycle.record(&task_id).await.map_err(reject)?;
    let upstream: UpstreamBody = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(|e| e.to_string()))
        .boxed();

    match state.relay.attach(task, upstream).await {
        Attached::Started(relay) => {
            tracing::info!(task_id = task_id.short(), "worker reporting task events");
            let outcome = relay.run(None).await;
            Ok((
                StatusCode::OK,
                Json(json!({ "taskId": task_id, "status": outcome.task.status })),
            ))
        }
        Attached::Joined(_) => Err((
            StatusCode::CONFLICT,
            Json(json!({
                "error": "Task is already being relayed",
                "taskId": task_id,
            })),
        )),
        Attached::Settled(task) => Err((
            StatusCode::CONFLICT,
            Json(json!({
                "error": "Task already finished",
                "taskId": task_id,
                "status": task.status,
            })),
        )),
    }
}
