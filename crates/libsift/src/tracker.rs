//! Client Progress State Machine.
//!
//! ```text
//! idle → queued → running → { done | error }
//! ```
//!
//! Progress is reconstructed from periodic snapshots, never from a live
//! stream, so a tracker can pick a task back up after a reconnect. Each
//! `start` bumps a generation counter; poll results and create responses
//! from an older generation are discarded, and the terminal callback fires
//! at most once per generation.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;

use sift_core::{ProgressEvent, QueueInfo, ResearchError};

use crate::api::{ResearchApi, TaskSnapshot};
use crate::status::{observe, Observed};

const DEFAULT_FAILURE: &str = "Research task failed";
const CANCELLED_MESSAGE: &str = "Research task was cancelled";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ClientStatus {
    #[default]
    Idle,
    Queued,
    Running,
    Done,
    Error,
}

/// What a consumer of the tracker sees.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerView {
    pub status: ClientStatus,
    pub task_id: Option<String>,
    pub events: Vec<ProgressEvent>,
    pub report: Option<String>,
    pub error: Option<ResearchError>,
    pub queue_info: Option<QueueInfo>,
}

type CompleteFn = Box<dyn Fn(String) + Send + Sync>;
type ErrorFn = Box<dyn Fn(ResearchError) + Send + Sync>;

/// Terminal callbacks. Both are optional.
#[derive(Default)]
pub struct Callbacks {
    on_complete: Option<CompleteFn>,
    on_error: Option<ErrorFn>,
}

impl Callbacks {
    /// Called with the report when a task completes with a non-empty one.
    pub fn on_complete(mut self, f: impl Fn(String) + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    /// Called when the task fails, is cancelled, or cannot be polled.
    pub fn on_error(mut self, f: impl Fn(ResearchError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

struct TrackerState {
    view: TrackerView,
    last_prompt: Option<String>,
    generation: u64,
    terminal_notified: bool,
    poller: Option<JoinHandle<()>>,
}

struct Inner<A> {
    api: A,
    chat_id: String,
    interval: Duration,
    callbacks: Callbacks,
    state: Mutex<TrackerState>,
}

/// Callback owed once the state lock is released.
enum Notify {
    Complete(String),
    Error(ResearchError),
}

pub struct ProgressTracker<A: ResearchApi> {
    inner: Arc<Inner<A>>,
}

impl<A: ResearchApi> ProgressTracker<A> {
    pub fn new(api: A, chat_id: impl Into<String>, interval: Duration, callbacks: Callbacks) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                chat_id: chat_id.into(),
                interval,
                callbacks,
                state: Mutex::new(TrackerState {
                    view: TrackerView::default(),
                    last_prompt: None,
                    generation: 0,
                    terminal_notified: false,
                    poller: None,
                }),
            }),
        }
    }

    pub fn view(&self) -> TrackerView {
        self.inner.lock().view.clone()
    }

    pub fn status(&self) -> ClientStatus {
        self.inner.lock().view.status
    }

    pub fn task_id(&self) -> Option<String> {
        self.inner.lock().view.task_id.clone()
    }

    /// Time spent waiting for a worker, up to now if still waiting.
    pub fn queue_elapsed(&self) -> Option<chrono::Duration> {
        let state = self.inner.lock();
        state
            .view
            .queue_info
            .as_ref()
            .map(|q| q.queue_wait(Utc::now()))
    }

    /// Create a task for `prompt` and poll it until it settles.
    ///
    /// Calling again with the same prompt while a task is queued or running
    /// does nothing. Any other call tears down the previous poller first.
    pub async fn start(&self, prompt: &str) {
        let prompt = prompt.trim().to_string();
        if prompt.is_empty() {
            return;
        }

        let generation = {
            let mut state = self.inner.lock();
            let busy = !matches!(state.view.status, ClientStatus::Idle | ClientStatus::Error);
            if busy && state.last_prompt.as_deref() == Some(prompt.as_str()) {
                tracing::debug!("start ignored, same prompt already in flight");
                return;
            }
            state.reset();
            state.view.status = ClientStatus::Queued;
            state.last_prompt = Some(prompt.clone());
            state.generation
        };

        let created = self.inner.api.create_task(&prompt, &self.inner.chat_id).await;

        let notify = {
            let mut state = self.inner.lock();
            if state.generation != generation {
                return;
            }
            match created {
                Ok(created) => {
                    tracing::info!(task_id = %created.task_id, "research task queued");
                    state.view.task_id = Some(created.task_id.clone());
                    state.view.queue_info = Some(QueueInfo::enqueued(Utc::now()));
                    state.poller = Some(tokio::spawn(poll(
                        self.inner.clone(),
                        generation,
                        created.task_id,
                    )));
                    None
                }
                Err(error) => state.settle_error(error),
            }
        };
        self.inner.notify(notify);
    }

    /// Stop polling and go back to idle. The server is not told; a task
    /// already handed to a worker keeps running there.
    pub fn cancel(&self) {
        let mut state = self.inner.lock();
        state.reset();
    }

    /// Start again with the last prompt, if there was one.
    pub async fn retry(&self) {
        let prompt = self.inner.lock().last_prompt.clone();
        if let Some(prompt) = prompt {
            self.start(&prompt).await;
        }
    }
}

impl<A: ResearchApi> Drop for ProgressTracker<A> {
    fn drop(&mut self) {
        if let Some(poller) = self.inner.lock().poller.take() {
            poller.abort();
        }
    }
}

impl TrackerState {
    /// Abort the poller, drop the view, and invalidate in-flight work.
    fn reset(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.abort();
        }
        self.generation += 1;
        self.terminal_notified = false;
        self.view = TrackerView::default();
    }

    fn settle_error(&mut self, error: ResearchError) -> Option<Notify> {
        self.view.status = ClientStatus::Error;
        self.view.error = Some(error.clone());
        self.poller = None;
        self.claim_terminal().then_some(Notify::Error(error))
    }

    fn claim_terminal(&mut self) -> bool {
        !std::mem::replace(&mut self.terminal_notified, true)
    }

    /// Fold one poll result in. Returns the callback owed and whether
    /// polling should continue.
    fn absorb(&mut self, polled: Result<TaskSnapshot, ResearchError>) -> (Option<Notify>, bool) {
        let snapshot = match polled {
            Ok(snapshot) => snapshot,
            Err(error) => return (self.settle_error(error), false),
        };

        self.view.events = snapshot.progress.events.clone();
        if snapshot.report.is_some() {
            self.view.report = snapshot.report.clone();
        }
        if let Some(queue_info) = snapshot.queue_info.clone() {
            self.view.queue_info = Some(queue_info);
        }

        match observe(&snapshot.status) {
            Observed::Pending => {
                self.view.status = ClientStatus::Queued;
                (None, true)
            }
            Observed::Active => {
                self.view.status = ClientStatus::Running;
                (None, true)
            }
            Observed::Completed => {
                self.view.status = ClientStatus::Done;
                self.poller = None;
                let report = snapshot.report.filter(|r| !r.trim().is_empty());
                let notify = match report {
                    Some(report) if self.claim_terminal() => Some(Notify::Complete(report)),
                    _ => None,
                };
                (notify, false)
            }
            Observed::Failed => {
                let message = snapshot
                    .progress
                    .last_error()
                    .map(|e| e.message.clone())
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_FAILURE.to_string());
                (self.settle_error(ResearchError::TaskFailed(message)), false)
            }
            Observed::Cancelled => (
                self.settle_error(ResearchError::TaskCancelled(CANCELLED_MESSAGE.to_string())),
                false,
            ),
        }
    }
}

impl<A: ResearchApi> Inner<A> {
    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        // A panicking callback never holds the lock, so poisoning only
        // means a panic elsewhere mid-update; the state is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn notify(&self, notify: Option<Notify>) {
        match notify {
            Some(Notify::Complete(report)) => {
                if let Some(f) = &self.callbacks.on_complete {
                    f(report);
                }
            }
            Some(Notify::Error(error)) => {
                tracing::warn!(error = %error, "research task ended in error");
                if let Some(f) = &self.callbacks.on_error {
                    f(error);
                }
            }
            None => {}
        }
    }
}

async fn poll<A: ResearchApi>(inner: Arc<Inner<A>>, generation: u64, task_id: String) {
    loop {
        let polled = inner.api.task_snapshot(&task_id).await;

        let (notify, keep_polling) = {
            let mut state = inner.lock();
            if state.generation != generation {
                return;
            }
            state.absorb(polled)
        };
        inner.notify(notify);
        if !keep_polling {
            return;
        }

        tokio::time::sleep(inner.interval).await;
    }
}
