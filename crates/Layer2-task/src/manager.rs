//! Task Manager - the public entry point
//!
//! Admission (validation and the per-owner gate) happens synchronously inside
//! `create_task`; everything after that runs on the task's own runner.
//! Operations are scoped to an owner: other owners' tasks are invisible to
//! `get_task` and refused by `cancel_task`.

use crate::container::DockerProvider;
use crate::event::{EventSink, TaskEvent};
use crate::gate::ConcurrencyGate;
use crate::permission::PermissionPolicy;
use crate::repository::{InMemoryTaskRepository, TaskRepository};
use crate::runner::{PermissionReply, RunnerConfig, RunnerDeps};
use crate::state::{TaskPolicy, TaskStatus};
use crate::supervisor::TaskSupervisor;
use crate::task::{Task, TaskId, TaskUpdate};
use agentbox_foundation::{AgentboxConfig, Error, Result};
use agentbox_session::{HttpSessionClient, HttpSessionClientConfig, PermissionResponse};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Task Manager - handles admission and owner-scoped access
#[derive(Clone)]
pub struct TaskManager {
    /// Durable task rows
    repository: Arc<dyn TaskRepository>,

    /// Outward event stream
    sink: Arc<dyn EventSink>,

    /// Per-owner admission
    gate: ConcurrencyGate,

    /// Live runners
    supervisor: TaskSupervisor,

    /// Runner settings
    config: Arc<RunnerConfig>,
}

impl TaskManager {
    /// Create a task manager over explicit collaborators
    pub fn new(config: RunnerConfig, max_concurrent: usize, deps: RunnerDeps) -> Self {
        let config = Arc::new(config);

        Self {
            repository: Arc::clone(&deps.repository),
            sink: Arc::clone(&deps.sink),
            gate: ConcurrencyGate::new(max_concurrent),
            supervisor: TaskSupervisor::new(Arc::clone(&config), deps),
            config,
        }
    }

    /// Wire the Docker provider, HTTP session client and in-memory repository
    pub fn from_config(
        config: &AgentboxConfig,
        permissions: Arc<dyn PermissionPolicy>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;

        let provider = DockerProvider::connect()?
            .with_stop_timeout(config.container.stop_timeout())
            .with_agent_port(config.container.agent_port);
        let client = HttpSessionClient::new(
            HttpSessionClientConfig::default().with_request_timeout(config.tasks.http_timeout()),
        )?;

        let deps = RunnerDeps {
            repository: Arc::new(InMemoryTaskRepository::new()),
            provider: Arc::new(provider),
            client: Arc::new(client),
            sink,
            permissions,
        };

        Ok(Self::new(
            RunnerConfig::from_config(config),
            config.tasks.max_concurrent_tasks,
            deps,
        ))
    }

    /// Admit a new task and start its runner
    ///
    /// Returns the task as persisted at admission (`pending`). Fails with
    /// `Validation` for a blank instruction or owner and `Capacity` when the
    /// owner is at its limit; neither failure allocates anything.
    pub async fn create_task(&self, instruction: &str, owner_id: &str) -> Result<Task> {
        if instruction.trim().is_empty() {
            return Err(Error::Validation("instruction must not be blank".to_string()));
        }
        if owner_id.trim().is_empty() {
            return Err(Error::Validation("owner_id must not be blank".to_string()));
        }

        let slot = self
            .gate
            .try_reserve(owner_id)
            .ok_or_else(|| Error::capacity(owner_id, self.gate.max_concurrent()))?;

        let task = Task::new(instruction, owner_id);
        self.repository.save(&task).await?;

        let deadline = Instant::now() + self.config.task_timeout;
        info!(task_id = %task.id, owner = owner_id, "Task admitted");
        self.sink
            .publish(task.id, TaskEvent::status(TaskStatus::Pending, None));

        self.supervisor.spawn(task.clone(), slot, deadline).await;
        Ok(task)
    }

    /// Request cancellation of a non-terminal task
    ///
    /// Returns once the runner has been signalled; teardown continues in the
    /// background. A task with no live runner is marked cancelled directly.
    pub async fn cancel_task(&self, task_id: TaskId, owner_id: &str) -> Result<()> {
        let task = self.owned_task(task_id, owner_id).await?;

        if !TaskPolicy::is_cancellable(task.status) {
            return Err(Error::InvalidState(format!(
                "Task {} is already {}",
                task_id, task.status
            )));
        }

        if self.supervisor.cancel(task_id).await {
            return Ok(());
        }

        // Runner already gone
        self.repository
            .update(task_id, &TaskUpdate::finish(TaskStatus::Cancelled, None))
            .await?;
        self.sink
            .publish(task_id, TaskEvent::status(TaskStatus::Cancelled, None));

        info!("Cancelled task {} without a live runner", task_id);
        Ok(())
    }

    /// Fetch a task owned by `owner_id`
    pub async fn get_task(&self, task_id: TaskId, owner_id: &str) -> Result<Task> {
        match self.repository.get(task_id).await? {
            Some(task) if task.owner_id == owner_id => Ok(task),
            _ => Err(Error::NotFound(format!("Task {} not found", task_id))),
        }
    }

    /// All tasks of `owner_id`, newest first
    pub async fn list_tasks(&self, owner_id: &str) -> Result<Vec<Task>> {
        self.repository.list_by_owner(owner_id).await
    }

    /// Answer a permission prompt the runner's policy left to the operator
    pub async fn reply_permission(
        &self,
        task_id: TaskId,
        owner_id: &str,
        permission_id: &str,
        response: PermissionResponse,
    ) -> Result<()> {
        let task = self.owned_task(task_id, owner_id).await?;
        if task.is_terminal() {
            return Err(Error::InvalidState(format!(
                "Task {} is already {}",
                task_id, task.status
            )));
        }

        let reply = PermissionReply {
            permission_id: permission_id.to_string(),
            response,
        };
        if !self.supervisor.reply_permission(task_id, reply).await {
            return Err(Error::InvalidState(format!(
                "Task {} has no live runner",
                task_id
            )));
        }

        debug!(%task_id, permission_id, %response, "Permission reply queued");
        Ok(())
    }

    /// Wait until the task is terminal, up to `timeout`
    ///
    /// Returns `None` on timeout or for an unknown task.
    pub async fn wait(&self, task_id: TaskId, timeout: Duration) -> Option<Task> {
        let poll = async {
            loop {
                match self.repository.get(task_id).await {
                    Ok(Some(task)) if task.is_terminal() => return Some(task),
                    Ok(Some(_)) => tokio::time::sleep(WAIT_POLL_INTERVAL).await,
                    _ => return None,
                }
            }
        };

        tokio::time::timeout(timeout, poll).await.ok().flatten()
    }

    /// Slots currently held by `owner_id`
    pub fn active_tasks(&self, owner_id: &str) -> usize {
        self.gate.active(owner_id)
    }

    /// Runners not yet reaped, across all owners
    pub async fn live_runners(&self) -> usize {
        self.supervisor.active_count().await
    }

    pub async fn is_live(&self, task_id: TaskId) -> bool {
        self.supervisor.is_tracked(task_id).await
    }

    pub fn max_concurrent(&self) -> usize {
        self.gate.max_concurrent()
    }

    async fn owned_task(&self, task_id: TaskId, owner_id: &str) -> Result<Task> {
        let task = self
            .repository
            .get(task_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Task {} not found", task_id)))?;

        if task.owner_id != owner_id {
            return Err(Error::Forbidden(format!(
                "Task {} belongs to another owner",
                task_id
            )));
        }
        Ok(task)
    }
}
