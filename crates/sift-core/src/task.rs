//! Research task record — the persisted shape keyed by `TaskId`.
//!
//! Field names serialize in camelCase; this is the layout of both the
//! Task Store record and the snapshot query response.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ResearchError;

// ── Identifiers ───────────────────────────────────────────────────────────────

/// Opaque task identifier, immutable after creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Hex-encoded BLAKE3 over owner, wall clock, topic and a random salt.
    pub fn generate(user_id: &str, topic: &str) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        let salt: u64 = rand::random();

        let mut h = blake3::Hasher::new();
        h.update(user_id.as_bytes());
        h.update(&nanos.to_le_bytes());
        h.update(topic.as_bytes());
        h.update(&salt.to_le_bytes());
        Self(hex::encode(&h.finalize().as_bytes()[..16]))
    }

    /// Accept a caller-supplied id. Blank input is a validation error.
    pub fn parse(raw: &str) -> Result<Self, ResearchError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ResearchError::Validation("Task id is required".into()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Prefix used in log lines.
    pub fn short(&self) -> &str {
        let end = self
            .0
            .char_indices()
            .nth(16)
            .map(|(i, _)| i)
            .unwrap_or(self.0.len());
        &self.0[..end]
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ── Status ────────────────────────────────────────────────────────────────────

/// Store vocabulary for task status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Terminal statuses are absorbing.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Progress ──────────────────────────────────────────────────────────────────

/// Type of a recorded progress event. Upstream types plus relay-internal
/// signals; anything else is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    Start,
    Plan,
    Progress,
    Done,
    Error,
    ConnectionError,
    Cancelled,
    Other(String),
}

impl EventKind {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "start" => EventKind::Start,
            "plan" => EventKind::Plan,
            "progress" => EventKind::Progress,
            "done" => EventKind::Done,
            "error" => EventKind::Error,
            "connection_error" => EventKind::ConnectionError,
            "cancelled" => EventKind::Cancelled,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Start => "start",
            EventKind::Plan => "plan",
            EventKind::Progress => "progress",
            EventKind::Done => "done",
            EventKind::Error => "error",
            EventKind::ConnectionError => "connection_error",
            EventKind::Cancelled => "cancelled",
            EventKind::Other(s) => s,
        }
    }
}

impl From<String> for EventKind {
    fn from(s: String) -> Self {
        EventKind::parse(&s)
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of `progress.events`. Immutable once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    /// Derived summary, not the raw payload.
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(kind: EventKind, message: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp,
        }
    }
}

/// Aggregate progress counters plus the append-only event history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u32>,
    #[serde(default)]
    pub completed_steps: u32,
    #[serde(default)]
    pub events: Vec<ProgressEvent>,
}

impl ProgressSummary {
    /// Most recent `error` event, if any.
    pub fn last_error(&self) -> Option<&ProgressEvent> {
        self.events
            .iter()
            .rev()
            .find(|e| e.kind == EventKind::Error)
    }
}

/// Placement of a task in the external worker queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueInfo {
    pub enqueued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// Distinct enqueue retries only; stream reconnects never count.
    #[serde(default)]
    pub retry_count: u32,
}

impl QueueInfo {
    pub fn enqueued(at: DateTime<Utc>) -> Self {
        Self {
            enqueued_at: at,
            started_at: None,
            finished_at: None,
            failed_at: None,
            worker_id: None,
            retry_count: 0,
        }
    }

    /// Time spent waiting in the queue: until the worker started (or the
    /// task ended without starting), otherwise until `now`.
    pub fn queue_wait(&self, now: DateTime<Utc>) -> chrono::Duration {
        let end = self
            .started_at
            .or(self.finished_at)
            .or(self.failed_at)
            .unwrap_or(now);
        (end - self.enqueued_at).max(chrono::Duration::zero())
    }
}

// ── Task record ───────────────────────────────────────────────────────────────

/// One user-initiated research request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResearchTask {
    pub task_id: TaskId,
    pub user_id: String,
    pub chat_id: String,
    pub topic: String,
    pub status: TaskStatus,
    pub progress: ProgressSummary,
    pub report: Option<String>,
    pub queue_info: QueueInfo,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ResearchTask {
    /// Fresh `queued` record.
    pub fn new(
        task_id: TaskId,
        user_id: impl Into<String>,
        chat_id: impl Into<String>,
        topic: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            user_id: user_id.into(),
            chat_id: chat_id.into(),
            topic: topic.into(),
            status: TaskStatus::Queued,
            progress: ProgressSummary::default(),
            report: None,
            queue_info: QueueInfo::enqueued(now),
            started_at: None,
            completed_at: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, stamping lifecycle timestamps the first time each
    /// status is entered. Terminal statuses are never left.
    pub fn transition(&mut self, next: TaskStatus, now: DateTime<Utc>) {
        if self.status.is_terminal() || self.status == next {
            return;
        }
        match next {
            TaskStatus::Queued => {}
            TaskStatus::Running => {
                self.started_at.get_or_insert(now);
                self.queue_info.started_at.get_or_insert(now);
            }
            TaskStatus::Completed => {
                self.completed_at = Some(now);
                self.queue_info.finished_at = Some(now);
            }
            TaskStatus::Failed => {
                self.failed_at = Some(now);
                self.queue_info.failed_at = Some(now);
            }
            TaskStatus::Cancelled => {
                self.queue_info.finished_at = Some(now);
            }
        }
        self.status = next;
    }

    /// Whether this snapshot may overwrite `stored` without losing
    /// history: a terminal verdict stays put and the event log never
    /// shrinks.
    pub fn may_replace(&self, stored: &ResearchTask) -> bool {
        let keeps_verdict = !stored.status.is_terminal() || self.status == stored.status;
        keeps_verdict && self.progress.events.len() >= stored.progress.events.len()
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }

    /// Non-blank report present.
    pub fn report_available(&self) -> bool {
        self.report
            .as_deref()
            .map(|r| !r.trim().is_empty())
            .unwrap_or(false)
    }
}

/// Lightweight listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub topic: String,
    pub status: TaskStatus,
    pub queued_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub report_available: bool,
}

impl From<&ResearchTask> for TaskSummary {
    fn from(t: &ResearchTask) -> Self {
        Self {
            task_id: t.task_id.clone(),
            topic: t.topic.clone(),
            status: t.status,
            queued_at: Some(t.queue_info.enqueued_at),
            started_at: t.started_at,
            completed_at: t.completed_at,
            failed_at: t.failed_at,
            updated_at: Some(t.updated_at),
            report_available: t.report_available(),
        }
    }
}
