//! Upstream research worker: opens its SSE stream with bounded retry.

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use std::time::Duration;

use sift_core::config::UpstreamConfig;
use sift_core::retry::{retry, RetryError, RetryPolicy};
use sift_core::ResearchError;

/// Upstream body as a stream of chunks; read failures are plain messages.
pub type UpstreamBody = BoxStream<'static, Result<Bytes, String>>;

#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    stream_url: String,
    policy: RetryPolicy,
    connect_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(config: &UpstreamConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            stream_url: config.stream_url(),
            policy: config.retry_policy(),
            connect_timeout: config.connect_timeout(),
        }
    }

    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    /// Open the event stream for `prompt`.
    ///
    /// Transport failures are retried under the policy and each one is
    /// reported to `on_failure` (0-indexed attempt). A response that is not
    /// OK, or not `text/event-stream`, fails immediately with
    /// `UpstreamProtocol`.
    pub async fn open<F>(&self, prompt: &str, on_failure: F) -> Result<UpstreamBody, ResearchError>
    where
        F: FnMut(u32, &ResearchError),
    {
        let body = serde_json::json!({ "prompt": prompt.trim() });

        let result = retry(
            &self.policy,
            |attempt| {
                let request = self
                    .http
                    .post(&self.stream_url)
                    .header(ACCEPT, "text/event-stream")
                    .json(&body);
                async move {
                    tracing::debug!(attempt, url = %self.stream_url, "connecting to research backend");
                    let response = match tokio::time::timeout(self.connect_timeout, request.send()).await
                    {
                        Err(_) => return Err(connect_error("timed out waiting for response headers")),
                        Ok(Err(e)) => return Err(connect_error(e.to_string())),
                        Ok(Ok(response)) => response,
                    };
                    into_event_stream(response).await
                }
            },
            ResearchError::is_retryable,
            on_failure,
        )
        .await;

        result.map_err(|e| match e {
            RetryError::Exhausted { attempts, last } => match last {
                ResearchError::UpstreamConnect { message, .. } => {
                    ResearchError::UpstreamConnect { attempts, message }
                }
                other => other,
            },
            RetryError::Aborted { error, .. } => error,
        })
    }
}

fn connect_error(message: impl Into<String>) -> ResearchError {
    ResearchError::UpstreamConnect {
        attempts: 0,
        message: message.into(),
    }
}

async fn into_event_stream(response: reqwest::Response) -> Result<UpstreamBody, ResearchError> {
    let status = response.status();
    if !status.is_success() {
        let reason = status.canonical_reason().unwrap_or("Unknown Status");
        let details = response.text().await.unwrap_or_default();
        return Err(ResearchError::UpstreamProtocol {
            status: status.as_u16(),
            message: format!("Backend error: {reason}"),
            details,
        });
    }

    let is_sse = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("text/event-stream"))
        .unwrap_or(false);
    if !is_sse {
        let details = response.text().await.unwrap_or_default();
        return Err(ResearchError::UpstreamProtocol {
            status: status.as_u16(),
            message: "Backend did not return SSE stream".to_string(),
            details,
        });
    }

    Ok(response
        .bytes_stream()
        .map(|chunk| chunk.map_err(|e| e.to_string()))
        .boxed())
}
