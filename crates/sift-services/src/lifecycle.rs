//! Task Lifecycle Creator — validates requests, ensures the owning chat,
//! creates the record, and hands the task to the worker queue.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use sift_core::{ResearchError, ResearchTask, TaskId, TaskProjector, TaskSummary};

use crate::chat::{Chat, ChatStore, Visibility};
use crate::queue::{QueueJob, WorkerQueue};
use crate::store::TaskStore;
use crate::writer::{TaskWriter, WriteQueues};

#[derive(Debug, Clone, Default)]
pub struct CreateTaskRequest {
    pub prompt: String,
    pub chat_id: String,
    pub model: Option<String>,
    pub visibility: Visibility,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedTask {
    pub task_id: TaskId,
    pub status: sift_core::TaskStatus,
}

/// What a live-stream request refers to.
#[derive(Debug, Clone)]
pub enum StreamTarget {
    Prompt { prompt: String, chat_id: String },
    Existing(TaskId),
}

/// Result of resolving a stream request.
#[derive(Debug, Clone)]
pub enum Resolved {
    /// Still in flight (or brand new): relay it.
    Relay(ResearchTask),
    /// Already terminal: answer with the stored snapshot.
    Finished(ResearchTask),
}

pub struct TaskLifecycle {
    writers: WriteQueues,
    chats: Arc<dyn ChatStore>,
    queue: Arc<dyn WorkerQueue>,
}

impl TaskLifecycle {
    pub fn new(writers: WriteQueues, chats: Arc<dyn ChatStore>, queue: Arc<dyn WorkerQueue>) -> Self {
        Self {
            writers,
            chats,
            queue,
        }
    }

    fn tasks(&self) -> &Arc<dyn TaskStore> {
        self.writers.store()
    }

    /// Create a task and enqueue it with the worker. An enqueue failure is
    /// persisted on the record before the error is returned.
    pub async fn create_task(
        &self,
        user_id: &str,
        req: CreateTaskRequest,
    ) -> Result<CreatedTask, ResearchError> {
        let (prompt, chat_id) = validate(&req.prompt, &req.chat_id)?;
        self.ensure_chat(user_id, &chat_id, &prompt, req.visibility)
            .await?;

        let task = self.insert_task(user_id, &chat_id, &prompt).await?;
        let job = QueueJob {
            task_id: task.task_id.clone(),
            prompt,
            model: req.model,
        };

        let writer = self.writers.writer(&task.task_id);
        match self.queue.enqueue(&job).await {
            Ok(placement) => {
                if let Some(worker_id) = placement.worker_id {
                    // The worker may already be reporting progress.
                    let mut latest = match self.tasks().get(&task.task_id).await {
                        Ok(Some(latest)) => latest,
                        _ => task.clone(),
                    };
                    latest.queue_info.worker_id = Some(worker_id);
                    latest.updated_at = Utc::now();
                    writer.submit(latest);
                    writer.flush().await;
                }
                Ok(CreatedTask {
                    task_id: task.task_id,
                    status: task.status,
                })
            }
            Err(error) => {
                let detail = match error {
                    ResearchError::Queue(detail) => detail,
                    other => other.to_string(),
                };
                tracing::warn!(task_id = task.task_id.short(), error = %detail, "enqueue failed");
                record_queue_failure(&writer, task, &detail).await;
                Err(ResearchError::Queue(detail))
            }
        }
    }

    /// Resolve a live-stream request: a new prompt creates a fresh record,
    /// an existing id is looked up under the caller's ownership.
    pub async fn create_or_reuse(
        &self,
        user_id: &str,
        target: StreamTarget,
    ) -> Result<Resolved, ResearchError> {
        match target {
            StreamTarget::Existing(task_id) => {
                let task = self.snapshot(user_id, &task_id).await?;
                if task.status.is_terminal() {
                    Ok(Resolved::Finished(task))
                } else {
                    Ok(Resolved::Relay(task))
                }
            }
            StreamTarget::Prompt { prompt, chat_id } => {
                let (prompt, chat_id) = validate(&prompt, &chat_id)?;
                self.ensure_chat(user_id, &chat_id, &prompt, Visibility::default())
                    .await?;
                let task = self.insert_task(user_id, &chat_id, &prompt).await?;
                Ok(Resolved::Relay(task))
            }
        }
    }

    /// The caller's task. Missing and foreign tasks are both `NotFound`.
    pub async fn snapshot(
        &self,
        user_id: &str,
        task_id: &TaskId,
    ) -> Result<ResearchTask, ResearchError> {
        match self.tasks().get(task_id).await? {
            Some(task) if task.is_owned_by(user_id) => Ok(task),
            _ => Err(ResearchError::NotFound),
        }
    }

    /// Any task by id, for worker-side callers that carry no user.
    pub async fn record(&self, task_id: &TaskId) -> Result<ResearchTask, ResearchError> {
        self.tasks()
            .get(task_id)
            .await?
            .ok_or(ResearchError::NotFound)
    }

    pub async fn list(&self, user_id: &str, limit: usize) -> Result<Vec<TaskSummary>, ResearchError> {
        let tasks = self.tasks().list_for_user(user_id, limit).await?;
        Ok(tasks.iter().map(TaskSummary::from).collect())
    }

    async fn ensure_chat(
        &self,
        user_id: &str,
        chat_id: &str,
        prompt: &str,
        visibility: Visibility,
    ) -> Result<(), ResearchError> {
        let chat = match self.chats.get(chat_id).await? {
            Some(chat) => chat,
            None => {
                let fresh = Chat::for_prompt(chat_id, user_id, prompt, visibility, Utc::now());
                // Someone may have created the chat since the lookup.
                let stored = self.chats.insert(fresh).await?;
                if stored.user_id == user_id {
                    tracing::debug!(chat_id, title = %stored.title, "chat created for research task");
                }
                stored
            }
        };
        if chat.user_id != user_id {
            return Err(ResearchError::Forbidden(
                "You do not have access to this chat".to_string(),
            ));
        }
        Ok(())
    }

    async fn insert_task(
        &self,
        user_id: &str,
        chat_id: &str,
        prompt: &str,
    ) -> Result<ResearchTask, ResearchError> {
        let task = ResearchTask::new(
            TaskId::generate(user_id, prompt),
            user_id,
            chat_id,
            prompt,
            Utc::now(),
        );
        self.tasks().insert(task.clone()).await?;
        tracing::info!(task_id = task.task_id.short(), chat_id, "research task created");
        Ok(task)
    }
}

fn validate(prompt: &str, chat_id: &str) -> Result<(String, String), ResearchError> {
    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(ResearchError::Validation("Invalid prompt".to_string()));
    }
    let chat_id = chat_id.trim();
    if chat_id.is_empty() {
        return Err(ResearchError::Validation("Invalid chatId".to_string()));
    }
    Ok((prompt.to_string(), chat_id.to_string()))
}

/// Fail a task that never reached a worker: one `error` event, status
/// `failed`, `queueInfo.failedAt` stamped.
pub(crate) async fn record_queue_failure(writer: &TaskWriter, mut task: ResearchTask, detail: &str) {
    let now: DateTime<Utc> = Utc::now();
    let mut projector = TaskProjector::resume(&task);
    projector.fail(format!("Failed to queue research task: {detail}"), now);
    projector.write_into(&mut task, now);
    writer.submit(task);
    writer.flush().await;
}
