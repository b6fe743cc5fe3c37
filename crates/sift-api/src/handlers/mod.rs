//! HTTP API handlers — research tasks as JSON, live progress as SSE.

pub mod events;
pub mod stream;
pub mod tasks;

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use sift_core::config::{SiftConfig, WorkerMode};
use sift_core::ResearchError;
use sift_services::{
    DetachedRelayQueue, HttpWorkerQueue, MemoryChatStore, MemoryTaskStore, StreamRelay,
    TaskLifecycle, TaskStore, UpstreamClient, WorkerQueue, WriteQueues,
};

#[derive(Clone)]
pub struct ApiState {
    pub lifecycle: Arc<TaskLifecycle>,
    pub relay: StreamRelay,
}

impl ApiState {
    /// In-memory stores, with the worker hand-off picked by `worker.mode`.
    pub fn from_config(config: &SiftConfig) -> Self {
        let store: Arc<dyn TaskStore> = Arc::new(MemoryTaskStore::new());
        let writers = WriteQueues::new(store);
        let relay = StreamRelay::new(
            writers.clone(),
            UpstreamClient::new(&config.upstream),
            config.upstream.max_duration(),
        );
        let queue: Arc<dyn WorkerQueue> = match config.worker.mode {
            WorkerMode::Queue => {
                Arc::new(HttpWorkerQueue::new(&config.upstream, &config.worker))
            }
            WorkerMode::Relay => Arc::new(DetachedRelayQueue::new(relay.clone())),
        };
        let lifecycle = TaskLifecycle::new(writers, Arc::new(MemoryChatStore::new()), queue);

        Self {
            lifecycle: Arc::new(lifecycle),
            relay,
        }
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────────

pub type ApiError = (StatusCode, Json<Value>);

/// JSON error body for a domain error.
fn reject(error: ResearchError) -> ApiError {
    let status =
        StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = match &error {
        ResearchError::Forbidden(message) => json!({ "error": "Forbidden", "message": message }),
        ResearchError::Queue(message) => {
            json!({ "error": "Failed to queue research task", "message": message })
        }
        other => json!({ "error": other.to_string() }),
    };
    if status.is_server_error() {
        tracing::warn!(status = status.as_u16(), error = %error, "request failed");
    }
    (status, Json(body))
}

fn malformed_body() -> ApiError {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "Malformed request body" })),
    )
}

/// Caller identity, resolved upstream of this service and passed in the
/// `X-User-Id` header.
pub struct Caller(pub String);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| Caller(v.to_string()))
            .ok_or_else(|| reject(ResearchError::Unauthorized))
    }
}

// Re-export handler functions for use in router setup.
pub use events::handle_task_events;
pub use stream::handle_stream;
pub use tasks::{handle_create_task, handle_get_task, handle_list_tasks};
