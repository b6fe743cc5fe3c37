//! /research/stream handler — live relay of the worker's event stream.
//!
//! Frames are forwarded already encoded (passthrough blocks included), so
//! the response body is the relay's byte channel rather than an `Sse`
//! wrapper that would re-encode them. A request for a task that is already
//! being relayed follows that relay instead of opening a second upstream.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::http::{HeaderName, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::stream::{unfold, Stream};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};

use sift_core::{ResearchError, TaskId};
use sift_services::{Attached, RelayRejected, Resolved, StreamTarget};

use super::{malformed_body, reject, ApiError, ApiState, Caller};

/// Frames buffered between the relay and a slow viewer.
const RELAY_BUFFER: usize = 64;

/// Idle gap after which a comment line is sent so proxies keep the
/// connection open.
const KEEP_ALIVE: Duration = Duration::from_secs(15);
const KEEP_ALIVE_COMMENT: &[u8] = b": keep-alive\n\n";

const X_ACCEL_BUFFERING: HeaderName = HeaderName::from_static("x-accel-buffering");

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct StreamBody {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
}

pub async fn handle_stream(
    State(state): State<ApiState>,
    Caller(user_id): Caller,
    body: Result<Json<StreamBody>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(body) = body.map_err(|_| malformed_body())?;

    let target = match body.task_id.filter(|id| !id.trim().is_empty()) {
        Some(id) => StreamTarget::Existing(TaskId::parse(&id).map_err(reject)?),
        None => StreamTarget::Prompt {
            prompt: body.prompt.unwrap_or_default(),
            chat_id: body.chat_id.unwrap_or_default(),
        },
    };

    let task = match state
        .lifecycle
        .create_or_reuse(&user_id, target)
        .await
        .map_err(reject)?
    {
        Resolved::Finished(task) => return Ok(Json(task).into_response()),
        Resolved::Relay(task) => task,
    };
    let task_id = task.task_id.clone();

    match state.relay.connect(task).await {
        Ok(Attached::Started(connected)) => {
            let (tx, rx) = mpsc::channel::<Bytes>(RELAY_BUFFER);
            tokio::spawn(connected.run(Some(tx)));
            Ok(event_stream(viewer_frames(rx)))
        }
        Ok(Attached::Joined(feed)) => {
            tracing::info!(task_id = task_id.short(), "viewer following live relay");
            Ok(event_stream(follower_frames(feed)))
        }
        Ok(Attached::Settled(task)) => Ok(Json(task).into_response()),
        Err(RelayRejected { error, .. }) => Err(connect_failure(&state, &task_id, error)),
    }
}

/// Frames from the relay this request owns. Ends when the relay drops its
/// sender.
fn viewer_frames(rx: mpsc::Receiver<Bytes>) -> impl Stream<Item = Result<Bytes, Infallible>> {
    unfold(rx, |mut rx| async move {
        let frame = match tokio::time::timeout(KEEP_ALIVE, rx.recv()).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return None,
            Err(_) => Bytes::from_static(KEEP_ALIVE_COMMENT),
        };
        Some((Ok(frame), rx))
    })
}

/// Frames from another request's relay. A follower that falls behind skips
/// ahead rather than stalling the relay.
fn follower_frames(
    feed: broadcast::Receiver<Bytes>,
) -> impl Stream<Item = Result<Bytes, Infallible>> {
    unfold(feed, |mut feed| async move {
        loop {
            let frame = match tokio::time::timeout(KEEP_ALIVE, feed.recv()).await {
                Ok(Ok(frame)) => frame,
                Ok(Err(RecvError::Lagged(skipped))) => {
                    tracing::debug!(skipped, "follower lagged behind live relay");
                    continue;
                }
                Ok(Err(RecvError::Closed)) => return None,
                Err(_) => Bytes::from_static(KEEP_ALIVE_COMMENT),
            };
            return Some((Ok(frame), feed));
        }
    })
}

fn event_stream<S>(frames: S) -> Response
where
    S: Stream<Item = Result<Bytes, Infallible>> + Send + 'static,
{
    (
        [
            (CONTENT_TYPE, "text/event-stream"),
            (CACHE_CONTROL, "no-cache, no-transform"),
            (X_ACCEL_BUFFERING, "no"),
        ],
        Body::from_stream(frames),
    )
        .into_response()
}

fn connect_failure(state: &ApiState, task_id: &TaskId, error: ResearchError) -> ApiError {
    let status = StatusCode::from_u16(error.http_status()).unwrap_or(StatusCode::BAD_GATEWAY);
    match error {
        ResearchError::UpstreamConnect { message, .. } => (
            status,
            Json(json!({
                "error": "Failed to connect to research backend",
                "message": message,
                "backend": state.relay.backend_url(),
                "taskId": task_id,
            })),
        ),
        ResearchError::UpstreamProtocol {
            message, details, ..
        } => (
            status,
            Json(json!({
                "error": message,
                "details": details,
                "taskId": task_id,
            })),
        ),
        other => reject(other),
    }
}
