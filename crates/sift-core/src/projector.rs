//! Task State Projector — folds normalized events into progress counters,
//! status and report for one task.

use chrono::{DateTime, Utc};
use serde_json::Number;

use crate::event::{derive_status, EventBody, NormalizedEvent};
use crate::task::{EventKind, ProgressEvent, ProgressSummary, ResearchTask, TaskStatus};

/// Running projection of one task's event sequence.
///
/// Invariants held across every call:
/// - `events` only grows
/// - `completed_steps` never decreases
/// - `total_steps` is never unset, and only grows once set
/// - a terminal status is never left
#[derive(Debug, Clone, PartialEq)]
pub struct TaskProjector {
    status: TaskStatus,
    progress: ProgressSummary,
    report: Option<String>,
}

impl TaskProjector {
    /// Pick up from whatever the record already holds.
    pub fn resume(task: &ResearchTask) -> Self {
        Self {
            status: task.status,
            progress: task.progress.clone(),
            report: task.report.clone(),
        }
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn progress(&self) -> &ProgressSummary {
        &self.progress
    }

    pub fn report(&self) -> Option<&str> {
        self.report.as_deref()
    }

    /// Fold one upstream event. Returns the status after the event.
    pub fn apply(&mut self, event: &NormalizedEvent, now: DateTime<Utc>) -> TaskStatus {
        match &event.body {
            EventBody::Plan {
                step_count: Some(n),
                ..
            } => self.refine_total(*n as u32),
            EventBody::Progress {
                labels,
                step,
                total,
            } => {
                match step.as_ref().and_then(as_count) {
                    Some(step) => {
                        self.progress.completed_steps = self.progress.completed_steps.max(step)
                    }
                    None => self.progress.completed_steps += 1,
                }
                if let Some(total) = total.as_ref().and_then(as_count) {
                    self.refine_total(total);
                }
                if let Some(headline) = labels.headline() {
                    self.progress.current_step = Some(headline.to_string());
                }
            }
            // Non-object progress payloads still count as one step.
            EventBody::Text(_) | EventBody::Opaque if event.kind == EventKind::Progress => {
                self.progress.completed_steps += 1;
            }
            _ => {}
        }

        if matches!(event.kind, EventKind::Error | EventKind::Done) {
            self.progress.current_step = None;
        }
        // A report arriving after the verdict is history only.
        if !self.status.is_terminal() {
            if let Some(report) = event.report() {
                self.report = Some(report.to_string());
            }
        }

        self.progress
            .events
            .push(ProgressEvent::new(event.kind.clone(), event.summary(), now));
        self.status = derive_status(self.status, &event.kind);
        self.status
    }

    /// Record a relay-internal signal without touching status.
    pub fn note(&mut self, kind: EventKind, message: impl Into<String>, now: DateTime<Utc>) {
        self.progress
            .events
            .push(ProgressEvent::new(kind, message, now));
    }

    /// Append an `error` event and fail the task.
    pub fn fail(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.note(EventKind::Error, message, now);
        self.progress.current_step = None;
        self.settle(TaskStatus::Failed);
    }

    /// Append a `cancelled` event and stop the task.
    pub fn cancel(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.note(EventKind::Cancelled, message, now);
        self.progress.current_step = None;
        self.settle(TaskStatus::Cancelled);
    }

    /// Copy the projection onto a record, stamping transition times and
    /// `updated_at`.
    pub fn write_into(&self, task: &mut ResearchTask, now: DateTime<Utc>) {
        task.transition(self.status, now);
        task.progress = self.progress.clone();
        if let Some(report) = &self.report {
            task.report = Some(report.clone());
        }
        task.updated_at = now;
    }

    fn settle(&mut self, status: TaskStatus) {
        if !self.status.is_terminal() {
            self.status = status;
        }
    }

    fn refine_total(&mut self, total: u32) {
        match self.progress.total_steps {
            Some(current) if total < current => {}
            _ => self.progress.total_steps = Some(total),
        }
    }
}

/// Non-negative integral view of a JSON number.
fn as_count(n: &Number) -> Option<u32> {
    if let Some(u) = n.as_u64() {
        return Some(u.min(u32::MAX as u64) as u32);
    }
    n.as_f64()
        .filter(|f| f.is_finite())
        .map(|f| f.max(0.0).floor().min(u32::MAX as f64) as u32)
}
