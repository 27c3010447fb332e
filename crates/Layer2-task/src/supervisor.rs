//! Task supervisor - spawns runners and cleans up after crashed ones
//!
//! Every runner gets a watcher task that awaits its join handle. A runner
//! that panics (or is aborted) never reaches its own teardown, so the watcher
//! releases whatever the runner's ledger still holds and records the task as
//! `failed` with `runner-crashed`.

use crate::event::TaskEvent;
use crate::gate::CapacitySlot;
use crate::runner::{
    release_resources, PermissionReply, RunnerConfig, RunnerDeps, RunnerLedger, SharedLedger,
    TaskRunner,
};
use crate::state::TaskStatus;
use crate::task::{Task, TaskError, TaskErrorCode, TaskId, TaskUpdate};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinError;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Control channels of a live runner
struct RunnerHandle {
    owner_id: String,
    cancel: watch::Sender<bool>,
    permissions: mpsc::UnboundedSender<PermissionReply>,
}

/// Registry of live runners
#[derive(Clone)]
pub struct TaskSupervisor {
    runners: Arc<RwLock<HashMap<TaskId, RunnerHandle>>>,
    config: Arc<RunnerConfig>,
    deps: RunnerDeps,
}

impl TaskSupervisor {
    pub fn new(config: Arc<RunnerConfig>, deps: RunnerDeps) -> Self {
        Self {
            runners: Arc::new(RwLock::new(HashMap::new())),
            config,
            deps,
        }
    }

    /// Start a runner for an admitted task
    ///
    /// The handle is registered before the runner starts, so a cancel issued
    /// right after admission always reaches it.
    pub async fn spawn(&self, task: Task, slot: CapacitySlot, deadline: Instant) {
        let task_id = task.id;
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (permission_tx, permission_rx) = mpsc::unbounded_channel();
        let ledger = RunnerLedger::shared(slot);

        {
            let mut runners = self.runners.write().await;
            runners.insert(
                task_id,
                RunnerHandle {
                    owner_id: task.owner_id.clone(),
                    cancel: cancel_tx,
                    permissions: permission_tx,
                },
            );
        }

        let runner = TaskRunner::new(
            task,
            Arc::clone(&self.config),
            self.deps.clone(),
            Arc::clone(&ledger),
            permission_rx,
        );
        let handle = tokio::spawn(runner.run(cancel_rx, deadline));

        let supervisor = self.clone();
        tokio::spawn(async move {
            match handle.await {
                Ok(task) => debug!(%task_id, status = %task.status, "Runner exited"),
                Err(e) => supervisor.recover(task_id, &ledger, e).await,
            }

            supervisor.runners.write().await.remove(&task_id);
        });
    }

    /// Teardown on behalf of a runner that did not finish
    async fn recover(&self, task_id: TaskId, ledger: &SharedLedger, failure: JoinError) {
        let reason = panic_message(failure);
        error!(%task_id, "Runner terminated abnormally: {}", reason);

        release_resources(task_id, ledger, self.deps.provider.as_ref()).await;

        let finalized = ledger.lock().is_finalized();
        if finalized {
            return;
        }

        let error = TaskError::with_message(TaskErrorCode::RunnerCrashed, reason);
        let update = TaskUpdate::finish(TaskStatus::Failed, Some(error.clone()));
        match self.deps.repository.update(task_id, &update).await {
            Ok(_) => {
                ledger.lock().mark_finalized();
                self.deps
                    .sink
                    .publish(task_id, TaskEvent::status(TaskStatus::Failed, Some(error)));
            }
            Err(e) => warn!(%task_id, "Could not record crashed runner: {}", e),
        }
    }

    /// Signal cancellation; false when no live runner exists
    pub async fn cancel(&self, task_id: TaskId) -> bool {
        let runners = self.runners.read().await;
        match runners.get(&task_id) {
            Some(handle) => {
                info!(%task_id, owner = %handle.owner_id, "Cancellation requested");
                handle.cancel.send(true).is_ok()
            }
            None => false,
        }
    }

    /// Hand an operator reply to the runner; false when no live runner exists
    pub async fn reply_permission(&self, task_id: TaskId, reply: PermissionReply) -> bool {
        let runners = self.runners.read().await;
        runners
            .get(&task_id)
            .is_some_and(|handle| handle.permissions.send(reply).is_ok())
    }

    pub async fn is_tracked(&self, task_id: TaskId) -> bool {
        self.runners.read().await.contains_key(&task_id)
    }

    /// Runners not yet reaped
    pub async fn active_count(&self) -> usize {
        self.runners.read().await.len()
    }
}

fn panic_message(failure: JoinError) -> String {
    if failure.is_cancelled() {
        return "runner task was aborted".to_string();
    }

    let payload = failure.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("runner panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("runner panicked: {}", message)
    } else {
        "runner panicked".to_string()
    }
}
