//! /research/tasks handlers — create, list, snapshot.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use sift_core::{ResearchTask, TaskId, TaskSummary};
use sift_services::{CreateTaskRequest, Visibility};

use super::{malformed_body, reject, ApiError, ApiState, Caller};

const DEFAULT_LIST_LIMIT: usize = 10;

// ── /research/tasks (POST) ────────────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskBody {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
}

pub async fn handle_create_task(
    State(state): State<ApiState>,
    Caller(user_id): Caller,
    body: Result<Json<CreateTaskBody>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Json(body) = body.map_err(|_| malformed_body())?;

    let visibility = match body.visibility.as_deref() {
        Some("public") => Visibility::Public,
        _ => Visibility::Private,
    };
    let req = CreateTaskRequest {
        prompt: body.prompt.unwrap_or_default(),
        chat_id: body.chat_id.unwrap_or_default(),
        model: body.model,
        visibility,
    };

    let created = state
        .lifecycle
        .create_task(&user_id, req)
        .await
        .map_err(reject)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "taskId": created.task_id, "status": created.status })),
    ))
}

// ── /research/tasks (GET) ─────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ListParams {
    pub limit: Option<String>,
}

#[derive(Serialize)]
pub struct ListTasksResponse {
    pub tasks: Vec<TaskSummary>,
}

pub async fn handle_list_tasks(
    State(state): State<ApiState>,
    Caller(user_id): Caller,
    Query(params): Query<ListParams>,
) -> Result<Json<ListTasksResponse>, ApiError> {
    let limit = params
        .limit
        .and_then(|l| l.trim().parse::<usize>().ok())
        .unwrap_or(DEFAULT_LIST_LIMIT);

    let tasks = state
        .lifecycle
        .list(&user_id, limit)
        .await
        .map_err(reject)?;
    Ok(Json(ListTasksResponse { tasks }))
}

// ── /research/tasks/{task_id} (GET) ───────────────────────────────────────────

pub async fn handle_get_task(
    State(state): State<ApiState>,
    Caller(user_id): Caller,
    Path(task_id): Path<String>,
) -> Result<Json<ResearchTask>, ApiError> {
    let task_id = TaskId::parse(&task_id).map_err(reject)?;
    let task = state
        .lifecycle
        .snapshot(&user_id, &task_id)
        .await
        .map_err(reject)?;
    Ok(Json(task))
}
