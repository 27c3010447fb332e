//! Task persistence
//!
//! The repository is the durable view of every task. Rows become immutable
//! once they reach a terminal status.

use crate::task::{Task, TaskId, TaskUpdate};
use agentbox_foundation::{Error, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

/// Storage for task rows
#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// Insert a new task
    async fn save(&self, task: &Task) -> Result<()>;

    /// Apply a partial update, returning the stored row
    ///
    /// Fails with `NotFound` for unknown ids and `InvalidState` when the row
    /// is already terminal.
    async fn update(&self, id: TaskId, update: &TaskUpdate) -> Result<Task>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>>;

    /// All tasks of `owner_id`, newest first
    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Task>>;
}

/// Process-local repository
#[derive(Default)]
pub struct InMemoryTaskRepository {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn save(&self, task: &Task) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&task.id) {
            return Err(Error::Storage(format!("Task {} already exists", task.id)));
        }
        tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn update(&self, id: TaskId, update: &TaskUpdate) -> Result<Task> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("Task {} not found", id)))?;

        if task.is_terminal() {
            return Err(Error::InvalidState(format!(
                "Task {} is already {}",
                id, task.status
            )));
        }

        update.apply_to(task);
        debug!(task_id = %id, status = %task.status, "Task row updated");
        Ok(task.clone())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        Ok(self.tasks.read().await.get(&id).cloned())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<Task>> {
        let tasks = self.tasks.read().await;
        let mut owned: Vec<Task> = tasks
            .values()
            .filter(|t| t.owner_id == owner_id)
            .cloned()
            .collect();
        owned.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(owned)
    }
}
