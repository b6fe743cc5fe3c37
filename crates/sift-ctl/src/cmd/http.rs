//! Shared HTTP helpers for CLI commands.

use anyhow::{Context, Result};
use serde_json::Value;

use libsift::HttpResearchApi;

pub fn base_url(port: u16) -> String {
    format!("http://127.0.0.1:{}/api", port)
}

pub fn api(port: u16, user: &str) -> HttpResearchApi {
    HttpResearchApi::new(base_url(port), user)
}

/// POST a JSON body to the live stream endpoint and hand back the raw
/// response, whatever its content type.
pub async fn post_stream(port: u16, user: &str, body: &Value) -> Result<reqwest::Response> {
    let url = format!("{}/research/stream", base_url(port));
    reqwest::Client::new()
        .post(&url)
        .header("x-user-id", user)
        .json(body)
        .send()
        .await
        .with_context(|| format!("failed to connect to siftd at {} (is it running?)", url))
}
