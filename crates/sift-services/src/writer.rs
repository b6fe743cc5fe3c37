//! Per-task serialized write queue.
//!
//! Every snapshot of a task goes through one actor, so writes land in the
//! store in submission order and the last snapshot submitted is the last one
//! stored. Callers never await the write itself; `flush` is the only
//! synchronization point.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

use sift_core::{ResearchTask, TaskId};

use crate::store::{StoreError, TaskStore};

enum WriteOp {
    Put(Box<ResearchTask>),
    Flush(oneshot::Sender<()>),
}

/// Registry of live per-task writer actors.
#[derive(Clone)]
pub struct WriteQueues {
    store: Arc<dyn TaskStore>,
    queues: Arc<DashMap<TaskId, mpsc::WeakUnboundedSender<WriteOp>>>,
}

impl WriteQueues {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self {
            store,
            queues: Arc::new(DashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Handle onto the task's queue, spawning the actor if none is running.
    /// Every handle for the same task feeds the same actor.
    pub fn writer(&self, task_id: &TaskId) -> TaskWriter {
        let tx = match self.queues.entry(task_id.clone()) {
            Entry::Occupied(mut slot) => match slot.get().upgrade() {
                Some(tx) => tx,
                None => {
                    let tx = self.spawn(task_id.clone());
                    slot.insert(tx.downgrade());
                    tx
                }
            },
            Entry::Vacant(slot) => {
                let tx = self.spawn(task_id.clone());
                slot.insert(tx.downgrade());
                tx
            }
        };
        TaskWriter {
            task_id: task_id.clone(),
            tx,
        }
    }

    /// Number of tasks with a registered queue.
    pub fn active(&self) -> usize {
        self.queues.len()
    }

    fn spawn(&self, task_id: TaskId) -> mpsc::UnboundedSender<WriteOp> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(
            self.store.clone(),
            self.queues.clone(),
            task_id,
            rx,
        ));
        tx
    }
}

async fn run_writer(
    store: Arc<dyn TaskStore>,
    queues: Arc<DashMap<TaskId, mpsc::WeakUnboundedSender<WriteOp>>>,
    task_id: TaskId,
    mut rx: mpsc::UnboundedReceiver<WriteOp>,
) {
    while let Some(op) = rx.recv().await {
        // Coalesce whatever queued up behind this op: only the newest
        // snapshot needs to land, and flushes ack after it does.
        let mut latest = None;
        let mut acks = Vec::new();
        let mut next = Some(op);
        while let Some(op) = next {
            match op {
                WriteOp::Put(task) => latest = Some(task),
                WriteOp::Flush(ack) => acks.push(ack),
            }
            next = rx.try_recv().ok();
        }

        if let Some(task) = latest {
            tracing::debug!(
                task_id = task_id.short(),
                status = %task.status,
                events = task.progress.events.len(),
                "writing task snapshot"
            );
            match store.put(*task).await {
                Ok(()) => {}
                Err(StoreError::Stale(_)) => {
                    tracing::info!(task_id = task_id.short(), "stale task snapshot refused");
                }
                Err(e) => {
                    tracing::warn!(task_id = task_id.short(), error = %e, "task snapshot write failed");
                }
            }
        }
        for ack in acks {
            let _ = ack.send(());
        }
    }

    queues.remove_if(&task_id, |_, weak| weak.upgrade().is_none());
}

/// Submission handle for one task's write queue.
#[derive(Clone)]
pub struct TaskWriter {
    task_id: TaskId,
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl TaskWriter {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Queue a full snapshot. Returns immediately.
    pub fn submit(&self, snapshot: ResearchTask) {
        if self.tx.send(WriteOp::Put(Box::new(snapshot))).is_err() {
            tracing::warn!(task_id = self.task_id.short(), "write queue closed, snapshot dropped");
        }
    }

    /// Wait until everything submitted so far has been written.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WriteOp::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}
