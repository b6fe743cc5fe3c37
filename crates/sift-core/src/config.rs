//! Configuration system for sift.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $SIFT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/sift/config.toml
//!   3. ~/.config/sift/config.toml

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::retry::RetryPolicy;
use crate::task::TaskId;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SiftConfig {
    pub api: ApiConfig,
    pub upstream: UpstreamConfig,
    pub worker: WorkerConfig,
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub bind: String,
    /// 0 = OS-assigned.
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Research worker base URL, no trailing slash.
    pub base_url: String,
    pub stream_path: String,
    pub tasks_path: String,
    /// Connection attempts before giving up.
    pub connect_attempts: u32,
    pub backoff_base_ms: u64,
    /// Budget for the upstream to answer with headers.
    pub connect_timeout_secs: u64,
    /// Hard cap on one relay run.
    pub max_duration_secs: u64,
}

/// How a created task reaches the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerMode {
    /// POST the task to the worker's queue endpoint.
    Queue,
    /// Drain the worker's stream in-process with no live viewer.
    Relay,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub mode: WorkerMode,
    /// Base URL a queued worker uses to push its event stream back to us.
    pub callback_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub poll_interval_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 9010,
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            stream_path: "/api/research/stream".to_string(),
            tasks_path: "/api/research/tasks".to_string(),
            connect_attempts: 3,
            backoff_base_ms: 500,
            connect_timeout_secs: 180,
            max_duration_secs: 300,
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            mode: WorkerMode::Queue,
            callback_base: "http://127.0.0.1:9010".to_string(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
        }
    }
}

// ── Derived values ────────────────────────────────────────────────────────────

impl UpstreamConfig {
    pub fn stream_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.stream_path)
    }

    pub fn tasks_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.tasks_path)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.connect_attempts,
            Duration::from_millis(self.backoff_base_ms),
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn max_duration(&self) -> Duration {
        Duration::from_secs(self.max_duration_secs)
    }
}

impl WorkerConfig {
    /// Where the worker posts the event stream for `task_id`.
    pub fn events_url(&self, task_id: &TaskId) -> String {
        format!(
            "{}/api/research/tasks/{}/events",
            self.callback_base.trim_end_matches('/'),
            task_id
        )
    }
}

impl ClientConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("sift")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl SiftConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            SiftConfig::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("SIFT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&SiftConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply SIFT_* overrides. `lookup` is the environment in production.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("SIFT_API__BIND") {
            self.api.bind = v;
        }
        if let Some(p) = lookup("SIFT_API__PORT").and_then(|v| v.parse().ok()) {
            self.api.port = p;
        }
        if let Some(v) = lookup("SIFT_UPSTREAM__BASE_URL") {
            self.upstream.base_url = v;
        }
        if let Some(n) = lookup("SIFT_UPSTREAM__CONNECT_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.upstream.connect_attempts = n;
        }
        if let Some(v) = lookup("SIFT_WORKER__MODE") {
            match v.as_str() {
                "queue" => self.worker.mode = WorkerMode::Queue,
                "relay" => self.worker.mode = WorkerMode::Relay,
                _ => {}
            }
        }
        if let Some(v) = lookup("SIFT_WORKER__CALLBACK_BASE") {
            self.worker.callback_base = v;
        }
        if let Some(ms) = lookup("SIFT_CLIENT__POLL_INTERVAL_MS").and_then(|v| v.parse().ok()) {
            self.client.poll_interval_ms = ms;
        }
    }
}
