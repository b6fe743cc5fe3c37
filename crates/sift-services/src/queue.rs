//! Worker queue port: how a freshly created task reaches a research worker.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use sift_core::config::{UpstreamConfig, WorkerConfig};
use sift_core::{ResearchError, TaskId};

use crate::lifecycle::record_queue_failure;
use crate::relay::{Attached, RelayRejected, StreamRelay};

/// Body posted to the worker's task endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueJob {
    pub task_id: TaskId,
    pub prompt: String,
    pub model: Option<String>,
}

/// Where the job landed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    pub worker_id: Option<String>,
}

/// One network hand-off per call; no retry at this layer.
#[async_trait]
pub trait WorkerQueue: Send + Sync {
    async fn enqueue(&self, job: &QueueJob) -> Result<Placement, ResearchError>;
}

// ── HTTP worker ───────────────────────────────────────────────────────────────

/// What the worker receives: the job plus where to post its event stream.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkerRequest<'a> {
    #[serde(flatten)]
    job: &'a QueueJob,
    events_url: String,
}

pub struct HttpWorkerQueue {
    http: reqwest::Client,
    tasks_url: String,
    worker: WorkerConfig,
}

impl HttpWorkerQueue {
    pub fn new(upstream: &UpstreamConfig, worker: &WorkerConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            tasks_url: upstream.tasks_url(),
            worker: worker.clone(),
        }
    }

    fn request<'a>(&self, job: &'a QueueJob) -> WorkerRequest<'a> {
        WorkerRequest {
            job,
            events_url: self.worker.events_url(&job.task_id),
        }
    }
}

#[async_trait]
impl WorkerQueue for HttpWorkerQueue {
    async fn enqueue(&self, job: &QueueJob) -> Result<Placement, ResearchError> {
        let response = self
            .http
            .post(&self.tasks_url)
            .json(&self.request(job))
            .send()
            .await
            .map_err(|e| ResearchError::Queue(e.to_string()))?;

        let status = response.status();
        let body: Option<Value> = response.json().await.ok();

        if !status.is_success() {
            let detail = body
                .as_ref()
                .and_then(|b| b.get("error"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| {
                    status.canonical_reason().unwrap_or("Unknown Status").to_string()
                });
            return Err(ResearchError::Queue(detail));
        }

        let worker_id = body
            .as_ref()
            .and_then(|b| b.get("workerId"))
            .and_then(Value::as_str)
            .map(str::to_string);
        tracing::info!(task_id = job.task_id.short(), worker_id = ?worker_id, "task handed to worker");
        Ok(Placement { worker_id })
    }
}

// ── In-process relay ──────────────────────────────────────────────────────────

/// Runs the stream relay in the background with no viewer attached, so the
/// worker's stream is drained into the store even if nobody watches.
pub struct DetachedRelayQueue {
    relay: StreamRelay,
}

impl DetachedRelayQueue {
    pub fn new(relay: StreamRelay) -> Self {
        Self { relay }
    }
}

#[async_trait]
impl WorkerQueue for DetachedRelayQueue {
    async fn enqueue(&self, job: &QueueJob) -> Result<Placement, ResearchError> {
        let task = self
            .relay
            .writers()
            .store()
            .get(&job.task_id)
            .await
            .map_err(|e| ResearchError::Queue(e.to_string()))?
            .ok_or_else(|| ResearchError::Queue("task record missing".to_string()))?;

        let relay = self.relay.clone();
        let job_id = job.task_id.clone();
        tokio::spawn(async move {
            match relay.connect(task).await {
                Ok(Attached::Started(connected)) => {
                    connected.run(None).await;
                }
                Ok(Attached::Joined(_)) | Ok(Attached::Settled(_)) => {
                    tracing::debug!(task_id = job_id.short(), "task already relayed elsewhere");
                }
                Err(RelayRejected {
                    error: ResearchError::UpstreamConnect { message, .. },
                    task,
                }) => {
                    let writer = relay.writers().writer(&task.task_id);
                    record_queue_failure(&writer, task, &message).await;
                }
                // Protocol faults were persisted as failed by the relay.
                Err(_) => {}
            }
        });

        Ok(Placement::default())
    }
}
