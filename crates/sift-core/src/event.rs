//! Event normalization — parsed frame → typed domain event.
//!
//! The upstream payload is loosely typed JSON. `EventBody` pins down the
//! fields each event type may carry, so summarizing and projecting both
//! match on one variant instead of probing a map.

use serde_json::{Map, Number, Value};

use crate::sse::Frame;
use crate::task::{EventKind, TaskId, TaskStatus};

const TEXT_SUMMARY_LIMIT: usize = 180;
const REPORT_SUMMARY_LIMIT: usize = 140;

/// Identifiers merged into every object payload forwarded downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub chat_id: String,
    pub user_id: String,
}

impl TaskContext {
    fn inject(&self, map: &mut Map<String, Value>) {
        map.insert("taskId".into(), Value::String(self.task_id.to_string()));
        map.insert("chatId".into(), Value::String(self.chat_id.clone()));
        map.insert("userId".into(), Value::String(self.user_id.clone()));
    }

    /// Synthetic `error` frame sent when the relay itself fails.
    pub fn error_frame(&self, message: &str) -> Frame {
        let mut map = Map::new();
        map.insert("error".into(), Value::String("Stream interrupted".into()));
        map.insert("message".into(), Value::String(message.to_string()));
        self.inject(&mut map);
        Frame::new("error", Value::Object(map).to_string())
    }
}

/// Frame data after the JSON attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Not valid JSON; kept as the raw text.
    Text(String),
    Json(Value),
}

/// `message` / `title` strings any object payload may carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Labels {
    pub message: Option<String>,
    pub title: Option<String>,
}

impl Labels {
    fn from_map(map: &Map<String, Value>) -> Self {
        Self {
            message: string_field(map, "message"),
            title: string_field(map, "title"),
        }
    }

    /// `message`, falling back to `title`.
    pub fn headline(&self) -> Option<&str> {
        self.message.as_deref().or(self.title.as_deref())
    }
}

/// Per-type view of the payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EventBody {
    /// Payload is a plain string (raw text or a JSON string).
    Text(String),
    /// Payload is JSON but not an object or string.
    Opaque,
    Start(Labels),
    Plan {
        labels: Labels,
        step_count: Option<usize>,
    },
    Progress {
        labels: Labels,
        step: Option<Number>,
        total: Option<Number>,
    },
    Done {
        labels: Labels,
        report: Option<String>,
    },
    Error(Labels),
    Other(Labels),
}

/// A frame turned into a domain event.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub kind: EventKind,
    /// Payload with context ids merged in (objects only).
    pub payload: Payload,
    pub body: EventBody,
    raw: String,
}

impl NormalizedEvent {
    pub fn from_frame(frame: &Frame, ctx: &TaskContext) -> Self {
        let kind = EventKind::parse(&frame.event);
        let mut payload = match serde_json::from_str::<Value>(&frame.data) {
            Ok(v) => Payload::Json(v),
            Err(_) => Payload::Text(frame.data.clone()),
        };
        if let Payload::Json(Value::Object(map)) = &mut payload {
            ctx.inject(map);
        }
        let body = EventBody::classify(&kind, &payload);
        Self {
            kind,
            payload,
            body,
            raw: frame.data.clone(),
        }
    }

    /// Short human-readable summary recorded in `progress.events`.
    pub fn summary(&self) -> String {
        let labels = match &self.body {
            EventBody::Text(text) => return truncate_with_ellipsis(text, TEXT_SUMMARY_LIMIT),
            EventBody::Opaque => return self.stringify(),
            EventBody::Start(l) | EventBody::Error(l) | EventBody::Other(l) => l,
            EventBody::Plan { labels, .. }
            | EventBody::Progress { labels, .. }
            | EventBody::Done { labels, .. } => labels,
        };
        if let Some(headline) = labels.headline() {
            return headline.to_string();
        }

        match &self.body {
            EventBody::Plan {
                step_count: Some(n),
                ..
            } => format!("Plan generated with {n} steps"),
            EventBody::Progress {
                step: Some(step),
                total: Some(total),
                ..
            } => format!("Progress {step}/{total}"),
            EventBody::Done {
                report: Some(report),
                ..
            } => report.chars().take(REPORT_SUMMARY_LIMIT).collect(),
            _ => self.stringify(),
        }
    }

    /// Report carried by a `done` payload.
    pub fn report(&self) -> Option<&str> {
        match &self.body {
            EventBody::Done { report, .. } => report.as_deref(),
            _ => None,
        }
    }

    /// Frame forwarded downstream: same event type, enriched payload.
    pub fn downstream_frame(&self) -> Frame {
        let data = match &self.payload {
            Payload::Json(v @ Value::Object(_)) => v.to_string(),
            _ => self.raw.clone(),
        };
        Frame::new(self.kind.as_str(), data)
    }

    fn stringify(&self) -> String {
        match &self.payload {
            Payload::Json(v) => v.to_string(),
            Payload::Text(t) => t.clone(),
        }
    }
}

impl EventBody {
    fn classify(kind: &EventKind, payload: &Payload) -> Self {
        let map = match payload {
            Payload::Text(t) => return EventBody::Text(t.clone()),
            Payload::Json(Value::String(s)) => return EventBody::Text(s.clone()),
            Payload::Json(Value::Object(map)) => map,
            Payload::Json(_) => return EventBody::Opaque,
        };
        let labels = Labels::from_map(map);

        match kind {
            EventKind::Start => EventBody::Start(labels),
            EventKind::Plan => EventBody::Plan {
                labels,
                step_count: map
                    .get("steps")
                    .and_then(Value::as_array)
                    .map(|steps| steps.len()),
            },
            EventKind::Progress => EventBody::Progress {
                labels,
                step: number_field(map, "step"),
                total: number_field(map, "total"),
            },
            EventKind::Done => EventBody::Done {
                labels,
                report: string_field(map, "report"),
            },
            EventKind::Error => EventBody::Error(labels),
            _ => EventBody::Other(labels),
        }
    }
}

/// Next status given the previous one and an event type. Terminal
/// statuses absorb everything.
pub fn derive_status(previous: TaskStatus, kind: &EventKind) -> TaskStatus {
    if previous.is_terminal() {
        return previous;
    }
    match kind {
        EventKind::Start | EventKind::Plan | EventKind::Progress => TaskStatus::Running,
        EventKind::Done => TaskStatus::Completed,
        EventKind::Error => TaskStatus::Failed,
        _ => previous,
    }
}

fn string_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(Value::as_str).map(str::to_string)
}

fn number_field(map: &Map<String, Value>, key: &str) -> Option<Number> {
    match map.get(key) {
        Some(Value::Number(n)) => Some(n.clone()),
        _ => None,
    }
}

fn truncate_with_ellipsis(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit - 3).collect();
    out.push_str("...");
    out
}
