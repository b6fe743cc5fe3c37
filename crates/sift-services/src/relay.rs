//! Stream Relay — bridges the upstream worker's SSE stream to the Task Store
//! and, optionally, to one attached downstream viewer.
//!
//! ```text
//! Idle → Connecting → Streaming → { Completed | Failed | Cancelled }
//! ```
//!
//! `RelayState` tracks the relay, not the task: a relay that drains an
//! upstream which ended on an `error` frame is `Completed`, while the task it
//! wrote is `failed`. Relay-level `Failed` means the relay itself gave up
//! (read error, deadline, rejected response).
//!
//! At most one relay runs per task. The first caller claims the task and
//! owns the upstream; later callers follow the live relay's feed, or get
//! the stored record back once the task has settled.

use bytes::Bytes;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use sift_core::{
    EventKind, Frame, FrameParser, NormalizedEvent, ResearchError, ResearchTask, SseBlock,
    TaskContext, TaskId, TaskProjector,
};

use crate::upstream::{UpstreamBody, UpstreamClient};
use crate::writer::{TaskWriter, WriteQueues};

pub const CANCELLED_BY_CLIENT: &str = "Stream cancelled by client";
pub const MAX_DURATION_EXCEEDED: &str = "relay exceeded maximum duration";

/// Frames a lagging follower may fall behind before it starts skipping.
const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl RelayState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RelayState::Completed | RelayState::Failed | RelayState::Cancelled
        )
    }
}

/// The upstream could not be opened. `task` is the record as persisted
/// after the attempt (connection notes, or the protocol failure).
#[derive(Debug)]
pub struct RelayRejected {
    pub error: ResearchError,
    pub task: ResearchTask,
}

#[derive(Debug)]
pub struct RelayOutcome {
    pub state: RelayState,
    pub task: ResearchTask,
}

/// What a caller gets when it asks to relay a task.
pub enum Attached {
    /// This caller owns the task's relay and must run it.
    Started(ConnectedRelay),
    /// A relay is already live for the task. The receiver sees every frame
    /// it forwards from now on and closes when it finishes.
    Joined(broadcast::Receiver<Bytes>),
    /// The task already settled; this is the stored record.
    Settled(ResearchTask),
}

/// Holds a task's slot in the live-relay registry until dropped.
struct RelayClaim {
    active: Arc<DashMap<TaskId, broadcast::Sender<Bytes>>>,
    task_id: TaskId,
    feed: broadcast::Sender<Bytes>,
}

impl RelayClaim {
    fn publish(&self, wire: &Bytes) {
        // No followers is fine.
        let _ = self.feed.send(wire.clone());
    }
}

impl Drop for RelayClaim {
    fn drop(&mut self) {
        self.active
            .remove_if(&self.task_id, |_, feed| feed.same_channel(&self.feed));
    }
}

#[derive(Clone)]
pub struct StreamRelay {
    writers: WriteQueues,
    upstream: UpstreamClient,
    max_duration: Duration,
    /// task_id → feed of the relay currently running it
    active: Arc<DashMap<TaskId, broadcast::Sender<Bytes>>>,
}

impl StreamRelay {
    pub fn new(writers: WriteQueues, upstream: UpstreamClient, max_duration: Duration) -> Self {
        Self {
            writers,
            upstream,
            max_duration,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn writers(&self) -> &WriteQueues {
        &self.writers
    }

    pub fn backend_url(&self) -> &str {
        self.upstream.stream_url()
    }

    /// Whether a relay is currently running `task_id`.
    pub fn is_live(&self, task_id: &TaskId) -> bool {
        self.active.contains_key(task_id)
    }

    /// Take the task's registry slot, or subscribe to the relay holding it.
    fn claim(&self, task_id: &TaskId) -> Result<RelayClaim, broadcast::Receiver<Bytes>> {
        match self.active.entry(task_id.clone()) {
            Entry::Occupied(live) => Err(live.get().subscribe()),
            Entry::Vacant(slot) => {
                let (feed, _) = broadcast::channel(FEED_CAPACITY);
                slot.insert(feed.clone());
                Ok(RelayClaim {
                    active: self.active.clone(),
                    task_id: task_id.clone(),
                    feed,
                })
            }
        }
    }

    /// Claim `task` and reload its freshest record. The caller's copy may
    /// predate a relay that finished in the meantime.
    async fn begin(&self, task: ResearchTask) -> Result<(RelayClaim, ResearchTask), Attached> {
        let task_id = task.task_id.clone();
        let claim = match self.claim(&task_id) {
            Ok(claim) => claim,
            Err(follower) => {
                tracing::debug!(task_id = task_id.short(), "relay already live, following");
                return Err(Attached::Joined(follower));
            }
        };
        let record = match self.writers.store().get(&task_id).await {
            Ok(Some(stored)) => stored,
            Ok(None) => task,
            Err(e) => {
                tracing::warn!(task_id = task_id.short(), error = %e, "task reload failed");
                task
            }
        };
        if record.status.is_terminal() {
            tracing::debug!(
                task_id = task_id.short(),
                status = %record.status,
                "task already settled"
            );
            return Err(Attached::Settled(record));
        }
        Ok((claim, record))
    }

    /// Connect phase. Every failed transport attempt is recorded as a
    /// `connection_error` event with the status left alone; a rejected
    /// response fails the task outright. No upstream is opened when the
    /// task is already live or settled.
    pub async fn connect(&self, task: ResearchTask) -> Result<Attached, RelayRejected> {
        let (claim, task) = match self.begin(task).await {
            Ok(claimed) => claimed,
            Err(attached) => return Ok(attached),
        };
        let writer = self.writers.writer(&task.task_id);
        let mut projector = TaskProjector::resume(&task);
        let mut record = task;
        let task_id = record.task_id.clone();
        let topic = record.topic.clone();

        tracing::debug!(task_id = task_id.short(), state = ?RelayState::Connecting, "relay state");

        let opened = self
            .upstream
            .open(&topic, |attempt, error| {
                let now = Utc::now();
                let detail = match error {
                    ResearchError::UpstreamConnect { message, .. } => message.clone(),
                    other => other.to_string(),
                };
                tracing::warn!(
                    task_id = task_id.short(),
                    attempt = attempt + 1,
                    error = %detail,
                    "research backend connection attempt failed"
                );
                projector.note(
                    EventKind::ConnectionError,
                    format!("Connection attempt {} failed: {}", attempt + 1, detail),
                    now,
                );
                projector.write_into(&mut record, now);
                writer.submit(record.clone());
            })
            .await;

        match opened {
            Ok(body) => {
                tracing::info!(task_id = task_id.short(), "relay connected");
                Ok(Attached::Started(
                    self.attach_with(record, projector, writer, body, claim),
                ))
            }
            Err(error) => {
                if let ResearchError::UpstreamProtocol { status, details, .. } = &error {
                    tracing::warn!(
                        task_id = task_id.short(),
                        status,
                        details = %details,
                        "research backend rejected stream"
                    );
                    let now = Utc::now();
                    projector.fail(error.to_string(), now);
                    projector.write_into(&mut record, now);
                    writer.submit(record.clone());
                } else {
                    tracing::warn!(task_id = task_id.short(), error = %error, "research backend unreachable");
                }
                writer.flush().await;
                Err(RelayRejected {
                    error,
                    task: record,
                })
            }
        }
    }

    /// Relay over an already-open upstream body, such as one a worker
    /// pushes to us.
    pub async fn attach(&self, task: ResearchTask, body: UpstreamBody) -> Attached {
        let (claim, task) = match self.begin(task).await {
            Ok(claimed) => claimed,
            Err(attached) => return attached,
        };
        let writer = self.writers.writer(&task.task_id);
        let projector = TaskProjector::resume(&task);
        Attached::Started(self.attach_with(task, projector, writer, body, claim))
    }

    fn attach_with(
        &self,
        task: ResearchTask,
        projector: TaskProjector,
        writer: TaskWriter,
        body: UpstreamBody,
        claim: RelayClaim,
    ) -> ConnectedRelay {
        ConnectedRelay {
            ctx: TaskContext {
                task_id: task.task_id.clone(),
                chat_id: task.chat_id.clone(),
                user_id: task.user_id.clone(),
            },
            record: task,
            projector,
            writer,
            body,
            max_duration: self.max_duration,
            claim,
        }
    }
}

enum Step {
    Chunk(Option<Result<Bytes, String>>),
    DownstreamClosed,
    Expired,
}

/// Streaming phase of one relay run.
pub struct ConnectedRelay {
    ctx: TaskContext,
    record: ResearchTask,
    projector: TaskProjector,
    writer: TaskWriter,
    body: UpstreamBody,
    max_duration: Duration,
    /// Released after the final flush, when the relay is dropped.
    claim: RelayClaim,
}

impl ConnectedRelay {
    pub fn task(&self) -> &ResearchTask {
        &self.record
    }

    /// Drain upstream until it ends, fails, the downstream goes away, or the
    /// maximum duration elapses. With no downstream the relay only persists.
    /// All writes are flushed before this returns.
    pub async fn run(mut self, downstream: Option<mpsc::Sender<Bytes>>) -> RelayOutcome {
        let task_id = self.ctx.task_id.clone();
        tracing::debug!(task_id = task_id.short(), state = ?RelayState::Streaming, "relay state");

        let mut downstream = downstream;
        let mut parser = FrameParser::new();
        let deadline = tokio::time::sleep(self.max_duration);
        tokio::pin!(deadline);

        let state = 'relay: loop {
            let step = tokio::select! {
                _ = downstream_closed(&downstream) => Step::DownstreamClosed,
                _ = &mut deadline => Step::Expired,
                item = self.body.next() => Step::Chunk(item),
            };

            match step {
                Step::Chunk(Some(Ok(chunk))) => {
                    for block in parser.push(&chunk) {
                        let wire = Bytes::from(match &block {
                            SseBlock::Frame(frame) => self.apply_frame(frame),
                            SseBlock::Passthrough(_) => block.encode(),
                        });
                        self.claim.publish(&wire);
                        if !forward(&downstream, wire).await {
                            break 'relay self.cancel();
                        }
                    }
                }
                Step::Chunk(Some(Err(message))) => {
                    self.interrupt(&message, &mut downstream).await;
                    break RelayState::Failed;
                }
                Step::Chunk(None) => {
                    if !self.projector.status().is_terminal() {
                        // Upstream ended without a verdict; keep what we have.
                        self.persist(Utc::now());
                    }
                    break RelayState::Completed;
                }
                Step::DownstreamClosed => break self.cancel(),
                Step::Expired => {
                    self.interrupt(MAX_DURATION_EXCEEDED, &mut downstream).await;
                    break RelayState::Failed;
                }
            }
        };

        self.writer.flush().await;
        tracing::info!(
            task_id = task_id.short(),
            state = ?state,
            status = %self.record.status,
            events = self.record.progress.events.len(),
            "relay finished"
        );
        RelayOutcome {
            state,
            task: self.record,
        }
    }

    /// Normalize, project, persist. Returns the frame to forward.
    fn apply_frame(&mut self, frame: &Frame) -> String {
        let now = Utc::now();
        let event = NormalizedEvent::from_frame(frame, &self.ctx);
        let before = self.projector.status();
        let after = self.projector.apply(&event, now);
        self.persist(now);

        if before != after {
            tracing::info!(
                task_id = self.ctx.task_id.short(),
                from = %before,
                to = %after,
                "task status changed"
            );
        } else {
            tracing::debug!(task_id = self.ctx.task_id.short(), event = %event.kind, "frame relayed");
        }
        event.downstream_frame().encode()
    }

    fn cancel(&mut self) -> RelayState {
        if self.projector.status().is_terminal() {
            tracing::debug!(task_id = self.ctx.task_id.short(), "downstream left after task settled");
        } else {
            tracing::info!(task_id = self.ctx.task_id.short(), "downstream disconnected, cancelling");
            let now = Utc::now();
            self.projector.cancel(CANCELLED_BY_CLIENT, now);
            self.persist(now);
        }
        RelayState::Cancelled
    }

    async fn interrupt(&mut self, message: &str, downstream: &mut Option<mpsc::Sender<Bytes>>) {
        tracing::warn!(task_id = self.ctx.task_id.short(), error = message, "relay interrupted");
        let now = Utc::now();
        self.projector.fail(message, now);
        self.persist(now);

        let frame = Bytes::from(self.ctx.error_frame(message).encode());
        self.claim.publish(&frame);
        if let Some(tx) = downstream.take() {
            let _ = tx.send(frame).await;
        }
    }

    fn persist(&mut self, now: chrono::DateTime<Utc>) {
        self.projector.write_into(&mut self.record, now);
        self.writer.submit(self.record.clone());
    }
}

/// Resolves once the downstream receiver is gone. Never resolves without one.
async fn downstream_closed(downstream: &Option<mpsc::Sender<Bytes>>) {
    match downstream {
        Some(tx) => tx.closed().await,
        None => std::future::pending().await,
    }
}

/// Send to the viewer, if any. `false` once the viewer is gone.
async fn forward(downstream: &Option<mpsc::Sender<Bytes>>, wire: Bytes) -> bool {
    match downstream {
        Some(tx) => tx.send(wire).await.is_ok(),
        None => true,
    }
}
