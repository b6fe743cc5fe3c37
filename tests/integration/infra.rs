//! Scripted backend, server spawning and HTTP helpers shared by the tests.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use sift_api::ApiState;
use sift_core::config::{SiftConfig, WorkerMode};

// ── Scripted backend ──────────────────────────────────────────────────────────

pub const SCENARIO_A: &str = "event: start\ndata: {}\n\n\
    event: plan\ndata: {\"steps\":[\"a\",\"b\"]}\n\n\
    event: progress\ndata: {\"step\":1,\"total\":2}\n\n\
    event: progress\ndata: {\"step\":2,\"total\":2}\n\n\
    event: done\ndata: {\"report\":\"R\"}\n\n";

pub const FAILS_WITH_TIMEOUT: &str = "event: start\ndata: {}\n\n\
    event: error\ndata: {\"message\":\"Timeout\"}\n\n";

/// How the backend answers `POST /api/research/stream`.
#[derive(Clone)]
pub enum StreamReply {
    /// 200 `text/event-stream` with this body.
    Sse(&'static str),
    /// 200 `text/event-stream`, one chunk per gap.
    Trickle(&'static [&'static str], Duration),
    /// 200 `application/json`; not a stream.
    Json(Value),
    /// Bare error status.
    Status(u16),
}

/// How the backend answers `POST /api/research/tasks`.
#[derive(Clone)]
pub enum QueueReply {
    Accept(&'static str),
    /// Accept, then shortly after post this script to the job's `eventsUrl`
    /// the way a worker reports progress.
    AcceptAndReport(&'static str, &'static str),
    Reject(u16, &'static str),
}

struct Backend {
    stream: StreamReply,
    queue: QueueReply,
    stream_calls: AtomicUsize,
    jobs: Mutex<Vec<Value>>,
    /// Status sift answered each worker report with.
    reports: Mutex<Vec<u16>>,
}

pub struct FakeBackend {
    pub url: String,
    inner: Arc<Backend>,
}

impl FakeBackend {
    pub async fn spawn(stream: StreamReply, queue: QueueReply) -> Result<Self> {
        let inner = Arc::new(Backend {
            stream,
            queue,
            stream_calls: AtomicUsize::new(0),
            jobs: Mutex::new(Vec::new()),
            reports: Mutex::new(Vec::new()),
        });
        let app = Router::new()
            .route("/api/research/stream", post(backend_stream))
            .route("/api/research/tasks", post(backend_queue))
            .with_state(inner.clone());
        let addr = serve_on_ephemeral(app).await?;
        Ok(Self {
            url: format!("http://{}", addr),
            inner,
        })
    }

    pub fn stream_calls(&self) -> usize {
        self.inner.stream_calls.load(Ordering::SeqCst)
    }

    pub fn jobs(&self) -> Vec<Value> {
        self.inner.jobs.lock().unwrap().clone()
    }

    pub fn reports(&self) -> Vec<u16> {
        self.inner.reports.lock().unwrap().clone()
    }
}

async fn backend_stream(State(b): State<Arc<Backend>>) -> Response {
    b.stream_calls.fetch_add(1, Ordering::SeqCst);
    match &b.stream {
        StreamReply::Sse(body) => {
            ([(header::CONTENT_TYPE, "text/event-stream")], *body).into_response()
        }
        StreamReply::Trickle(chunks, gap) => {
            let gap = *gap;
            let body = futures::stream::iter(chunks.iter().copied()).then(move |chunk| async move {
                tokio::time::sleep(gap).await;
                Ok::<_, Infallible>(chunk)
            });
            (
                [(header::CONTENT_TYPE, "text/event-stream")],
                Body::from_stream(body),
            )
                .into_response()
        }
        StreamReply::Json(value) => Json(value.clone()).into_response(),
        StreamReply::Status(code) => StatusCode::from_u16(*code).unwrap().into_response(),
    }
}

async fn backend_queue(State(b): State<Arc<Backend>>, Json(job): Json<Value>) -> Response {
    let events_url = job["eventsUrl"].as_str().map(str::to_string);
    b.jobs.lock().unwrap().push(job);
    match &b.queue {
        QueueReply::Accept(worker) => Json(json!({ "workerId": worker })).into_response(),
        QueueReply::AcceptAndReport(worker, script) => {
            if let Some(url) = events_url {
                tokio::spawn(report_events(b.clone(), url, script));
            }
            Json(json!({ "workerId": worker })).into_response()
        }
        QueueReply::Reject(code, error) => (
            StatusCode::from_u16(*code).unwrap(),
            Json(json!({ "error": error })),
        )
            .into_response(),
    }
}

/// Worker side of the queue contract: push the event stream back to sift.
async fn report_events(b: Arc<Backend>, url: String, script: &'static str) {
    tokio::time::sleep(Duration::from_millis(20)).await;
    let sent = reqwest::Client::new()
        .post(&url)
        .header(reqwest::header::CONTENT_TYPE, "text/event-stream")
        .body(script)
        .send()
        .await;
    if let Ok(resp) = sent {
        b.reports.lock().unwrap().push(resp.status().as_u16());
    }
}

async fn bind_ephemeral() -> Result<(TcpListener, SocketAddr)> {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .context("failed to bind loopback listener")?;
    let addr = listener.local_addr()?;
    Ok((listener, addr))
}

fn serve(listener: TcpListener, app: Router) {
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
}

async fn serve_on_ephemeral(app: Router) -> Result<SocketAddr> {
    let (listener, addr) = bind_ephemeral().await?;
    serve(listener, app);
    Ok(addr)
}

/// A loopback URL nothing is listening on.
pub async fn closed_port_url() -> Result<String> {
    let (listener, addr) = bind_ephemeral().await?;
    drop(listener);
    Ok(format!("http://{}", addr))
}

// ── sift server ───────────────────────────────────────────────────────────────

pub fn config(backend_url: &str, mode: WorkerMode) -> SiftConfig {
    let mut cfg = SiftConfig::default();
    cfg.upstream.base_url = backend_url.to_string();
    cfg.upstream.backoff_base_ms = 1;
    cfg.upstream.connect_timeout_secs = 5;
    cfg.upstream.max_duration_secs = 10;
    cfg.worker.mode = mode;
    cfg
}

/// Start a sift API server; returns its `/api` base URL. Workers are told
/// to report back to this server.
pub async fn spawn_sift(cfg: &SiftConfig) -> Result<String> {
    let (listener, addr) = bind_ephemeral().await?;
    let mut cfg = cfg.clone();
    cfg.worker.callback_base = format!("http://{}", addr);
    serve(listener, sift_api::router(ApiState::from_config(&cfg)));
    Ok(format!("http://{}/api", addr))
}

// ── HTTP helpers ──────────────────────────────────────────────────────────────

pub struct Reply {
    pub status: u16,
    pub content_type: String,
    pub text: String,
}

impl Reply {
    pub fn json(&self) -> Value {
        serde_json::from_str(&self.text)
            .unwrap_or_else(|e| panic!("not JSON ({e}): {}", self.text))
    }

    /// `(event, data)` pairs of an event-stream body.
    pub fn frames(&self) -> Vec<(String, Value)> {
        self.text
            .split("\n\n")
            .filter_map(|block| {
                let event = block.lines().find_map(|l| l.strip_prefix("event: "))?;
                let data = block.lines().find_map(|l| l.strip_prefix("data: "))?;
                let data = serde_json::from_str(data).unwrap_or(Value::String(data.into()));
                Some((event.to_string(), data))
            })
            .collect()
    }
}

async fn reply(resp: reqwest::Response) -> Result<Reply> {
    let status = resp.status().as_u16();
    let content_type = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let text = resp.text().await.context("failed to read body")?;
    Ok(Reply {
        status,
        content_type,
        text,
    })
}

pub async fn api_post(base: &str, path: &str, user: Option<&str>, body: &Value) -> Result<Reply> {
    let mut req = reqwest::Client::new()
        .post(format!("{}{}", base, path))
        .json(body);
    if let Some(user) = user {
        req = req.header("x-user-id", user);
    }
    reply(req.send().await?).await
}

pub async fn api_get(base: &str, path: &str, user: Option<&str>) -> Result<Reply> {
    let mut req = reqwest::Client::new().get(format!("{}{}", base, path));
    if let Some(user) = user {
        req = req.header("x-user-id", user);
    }
    reply(req.send().await?).await
}

/// Poll a task until `done` accepts it, or give up after ~2s.
pub async fn wait_for_task(
    base: &str,
    user: &str,
    task_id: &str,
    done: impl Fn(&Value) -> bool,
) -> Result<Value> {
    let path = format!("/research/tasks/{}", task_id);
    for _ in 0..100 {
        let task = api_get(base, &path, Some(user)).await?.json();
        if done(&task) {
            return Ok(task);
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    anyhow::bail!("task {} never reached the expected state", task_id)
}
