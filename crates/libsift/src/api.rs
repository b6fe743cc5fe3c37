//! Research API port and its HTTP implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};

use sift_core::{ProgressSummary, QueueInfo, ResearchError, TaskSummary};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedTask {
    pub task_id: String,
    pub status: String,
}

/// Point-in-time task record as the server reports it. `status` stays a
/// raw string so unknown values can be classified instead of rejected.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub task_id: String,
    pub status: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub progress: ProgressSummary,
    #[serde(default)]
    pub report: Option<String>,
    #[serde(default)]
    pub queue_info: Option<QueueInfo>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait ResearchApi: Send + Sync + 'static {
    async fn create_task(&self, prompt: &str, chat_id: &str) -> Result<CreatedTask, ResearchError>;

    async fn task_snapshot(&self, task_id: &str) -> Result<TaskSnapshot, ResearchError>;

    async fn list_tasks(&self, limit: usize) -> Result<Vec<TaskSummary>, ResearchError>;
}

/// Talks to a sift API server on behalf of one user.
#[derive(Clone)]
pub struct HttpResearchApi {
    http: reqwest::Client,
    base: String,
    user_id: String,
}

impl HttpResearchApi {
    /// `base` is the API root, e.g. `http://127.0.0.1:9010/api`.
    pub fn new(base: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
            user_id: user_id.into(),
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ResearchError> {
        let response = request
            .header("x-user-id", &self.user_id)
            .send()
            .await
            .map_err(|e| ResearchError::PollingTransport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            return Err(error_from(status, &body));
        }
        response
            .json::<T>()
            .await
            .map_err(|e| ResearchError::PollingTransport(format!("invalid response: {e}")))
    }
}

#[derive(Deserialize)]
struct ListResponse {
    tasks: Vec<TaskSummary>,
}

#[async_trait]
impl ResearchApi for HttpResearchApi {
    async fn create_task(&self, prompt: &str, chat_id: &str) -> Result<CreatedTask, ResearchError> {
        let url = format!("{}/research/tasks", self.base);
        let body = json!({ "prompt": prompt, "chatId": chat_id });
        self.send(self.http.post(url).json(&body)).await
    }

    async fn task_snapshot(&self, task_id: &str) -> Result<TaskSnapshot, ResearchError> {
        let url = format!("{}/research/tasks/{}", self.base, task_id);
        self.send(self.http.get(url)).await
    }

    async fn list_tasks(&self, limit: usize) -> Result<Vec<TaskSummary>, ResearchError> {
        let url = format!("{}/research/tasks?limit={}", self.base, limit);
        let list: ListResponse = self.send(self.http.get(url)).await?;
        Ok(list.tasks)
    }
}

/// Rebuild the server's error from its status and JSON body.
fn error_from(status: StatusCode, body: &Value) -> ResearchError {
    let field = |key: &str| body.get(key).and_then(Value::as_str).map(str::to_string);
    let error = field("error");
    let message = field("message");
    let fallback = || {
        status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()))
    };

    match status {
        StatusCode::BAD_REQUEST => ResearchError::Validation(error.unwrap_or_else(fallback)),
        StatusCode::UNAUTHORIZED => ResearchError::Unauthorized,
        StatusCode::FORBIDDEN => {
            ResearchError::Forbidden(message.or(error).unwrap_or_else(fallback))
        }
        StatusCode::NOT_FOUND => ResearchError::NotFound,
        StatusCode::BAD_GATEWAY if error.as_deref() == Some("Failed to queue research task") => {
            ResearchError::Queue(message.unwrap_or_else(fallback))
        }
        _ => ResearchError::PollingTransport(
            message.or(error).unwrap_or_else(fallback),
        ),
    }
}
