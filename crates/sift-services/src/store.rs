//! Task Store port and the in-memory implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use sift_core::{ResearchError, ResearchTask, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("task {0} already exists")]
    Duplicate(TaskId),
    #[error("snapshot of task {0} would regress the stored record")]
    Stale(TaskId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for ResearchError {
    fn from(e: StoreError) -> Self {
        ResearchError::Persistence(e.to_string())
    }
}

/// Durable task records keyed by task id.
///
/// `put` is a full-snapshot overwrite, except that a snapshot which would
/// move a terminal record back or drop events is refused as `Stale`.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Store a new record. Existing ids are rejected.
    async fn insert(&self, task: ResearchTask) -> Result<(), StoreError>;

    async fn get(&self, task_id: &TaskId) -> Result<Option<ResearchTask>, StoreError>;

    /// Overwrite (or create) the record with this snapshot. See
    /// [`ResearchTask::may_replace`].
    async fn put(&self, task: ResearchTask) -> Result<(), StoreError>;

    /// A user's tasks, most recently created first.
    async fn list_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ResearchTask>, StoreError>;
}

/// In-memory store for research tasks.
#[derive(Clone, Default)]
pub struct MemoryTaskStore {
    /// task_id → record
    tasks: Arc<DashMap<TaskId, ResearchTask>>,
    /// user_id → task ids they own, in creation order
    user_tasks: Arc<DashMap<String, Vec<TaskId>>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            user_tasks: Arc::new(DashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn index(&self, task: &ResearchTask) {
        self.user_tasks
            .entry(task.user_id.clone())
            .or_default()
            .push(task.task_id.clone());
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn insert(&self, task: ResearchTask) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;

        match self.tasks.entry(task.task_id.clone()) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(task.task_id)),
            Entry::Vacant(slot) => {
                self.index(&task);
                slot.insert(task);
                Ok(())
            }
        }
    }

    async fn get(&self, task_id: &TaskId) -> Result<Option<ResearchTask>, StoreError> {
        Ok(self.tasks.get(task_id).map(|t| t.clone()))
    }

    async fn put(&self, task: ResearchTask) -> Result<(), StoreError> {
        use dashmap::mapref::entry::Entry;

        match self.tasks.entry(task.task_id.clone()) {
            Entry::Occupied(mut slot) => {
                if !task.may_replace(slot.get()) {
                    return Err(StoreError::Stale(task.task_id));
                }
                slot.insert(task);
            }
            Entry::Vacant(slot) => {
                self.index(&task);
                slot.insert(task);
            }
        }
        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<ResearchTask>, StoreError> {
        let ids = self
            .user_tasks
            .get(user_id)
            .map(|ids| ids.clone())
            .unwrap_or_default();

        let mut tasks: Vec<ResearchTask> = ids
            .iter()
            .filter_map(|id| self.tasks.get(id).map(|t| t.clone()))
            .collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks.truncate(limit);
        Ok(tasks)
    }
}
