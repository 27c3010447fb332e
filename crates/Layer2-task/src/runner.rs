//! Task runner - owns one task from admission to teardown
//!
//! ```text
//! pending ──▶ starting ──▶ running ──▶ completed
//!    │            │           │
//!    └────────────┴───────────┴──▶ failed | cancelled
//! ```
//!
//! The lifecycle future (provision, health, session, prompt, stream) is raced
//! against the cancel signal and the deadline. Whichever wins, the lifecycle
//! future is dropped, which abandons any call still in flight, and the same
//! teardown runs. Resources that need releasing are recorded in a
//! `RunnerLedger` shared with the supervisor so a crashed runner can be
//! cleaned up from outside.

use crate::container::{ContainerProvider, ContainerSpec, TASK_LABEL};
use crate::event::{EventSink, TaskEvent};
use crate::gate::CapacitySlot;
use crate::permission::{PermissionDecision, PermissionPolicy};
use crate::repository::TaskRepository;
use crate::state::{TaskPolicy, TaskStatus};
use crate::task::{Task, TaskError, TaskErrorCode, TaskId, TaskUpdate};
use agentbox_foundation::AgentboxConfig;
use agentbox_session::{
    EventReader, PermissionResponse, PromptPart, SessionClient, SessionEvent, SessionStatusKind,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

// ============================================================================
// Configuration and collaborators
// ============================================================================

/// Settings every runner is started with
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Template for the task container; name and task label are added per task
    pub container: ContainerSpec,

    /// Deadline measured from admission
    pub task_timeout: Duration,

    /// Health checks attempted before giving up
    pub health_check_retries: u32,

    /// Sleep between health checks
    pub health_check_interval: Duration,

    /// Bound on the best-effort abort during cancellation
    pub abort_timeout: Duration,

    /// Host the published agent port is reached on
    pub agent_host: String,
}

impl RunnerConfig {
    pub fn from_config(config: &AgentboxConfig) -> Self {
        Self {
            container: ContainerSpec::from_settings(&config.container),
            task_timeout: config.tasks.task_timeout(),
            health_check_retries: config.tasks.health_check_retries,
            health_check_interval: config.tasks.health_check_interval(),
            abort_timeout: config.tasks.abort_timeout(),
            agent_host: config.tasks.agent_host.clone(),
        }
    }

    pub fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    pub fn with_health_checks(mut self, retries: u32, interval: Duration) -> Self {
        self.health_check_retries = retries;
        self.health_check_interval = interval;
        self
    }

    pub fn with_abort_timeout(mut self, timeout: Duration) -> Self {
        self.abort_timeout = timeout;
        self
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self::from_config(&AgentboxConfig::default())
    }
}

/// Collaborators shared by every runner
#[derive(Clone)]
pub struct RunnerDeps {
    pub repository: Arc<dyn TaskRepository>,
    pub provider: Arc<dyn ContainerProvider>,
    pub client: Arc<dyn SessionClient>,
    pub sink: Arc<dyn EventSink>,
    pub permissions: Arc<dyn PermissionPolicy>,
}

/// Operator answer to a permission prompt the policy left unanswered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionReply {
    pub permission_id: String,
    pub response: PermissionResponse,
}

// ============================================================================
// RunnerLedger
// ============================================================================

/// Resources held by one runner
///
/// Each resource is taken out when released, so running the teardown twice
/// never double-stops a container or double-releases a slot.
#[derive(Debug, Default)]
pub struct RunnerLedger {
    container_id: Option<String>,
    /// Name of a container whose creation is in flight
    container_name: Option<String>,
    reader: Option<EventReader>,
    slot: Option<CapacitySlot>,
    finalized: bool,
}

pub type SharedLedger = Arc<Mutex<RunnerLedger>>;

impl RunnerLedger {
    pub fn shared(slot: CapacitySlot) -> SharedLedger {
        Arc::new(Mutex::new(Self {
            slot: Some(slot),
            ..Default::default()
        }))
    }

    /// Whether the terminal state has been persisted
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn holds_slot(&self) -> bool {
        self.slot.is_some()
    }

    pub fn container_id(&self) -> Option<&str> {
        self.container_id.as_deref()
    }

    pub(crate) fn mark_finalized(&mut self) {
        self.finalized = true;
    }
}

/// Stop the reader, stop and remove the container, release the slot
pub async fn release_resources(
    task_id: TaskId,
    ledger: &SharedLedger,
    provider: &dyn ContainerProvider,
) {
    let (reader, container, slot) = {
        let mut ledger = ledger.lock();
        let pending_name = ledger.container_name.take();
        let container = ledger.container_id.take().or(pending_name);
        (ledger.reader.take(), container, ledger.slot.take())
    };

    if let Some(reader) = reader {
        reader.stop();
    }

    if let Some(container) = container {
        if let Err(e) = provider.stop(&container).await {
            error!(%task_id, container = %container, "Failed to stop container: {}", e);
        }
        if let Err(e) = provider.remove(&container).await {
            error!(%task_id, container = %container, "Failed to remove container: {}", e);
        }
    }

    if let Some(slot) = slot {
        slot.release();
    }
}

// ============================================================================
// TaskRunner
// ============================================================================

/// What the runner has observed on the event stream so far
#[derive(Debug, Clone, Default)]
pub struct RunnerProgress {
    pub events_seen: u64,
    pub last_event_type: Option<String>,
    /// The session has reported itself busy at least once
    pub seen_busy: bool,
}

enum Outcome {
    Completed,
    Failed(TaskError),
    Cancelled,
    TimedOut,
}

/// State machine driving one task
pub struct TaskRunner {
    task: Task,
    config: Arc<RunnerConfig>,
    deps: RunnerDeps,
    ledger: SharedLedger,
    permission_rx: mpsc::UnboundedReceiver<PermissionReply>,
    base_url: Option<String>,
    progress: RunnerProgress,
}

impl TaskRunner {
    pub fn new(
        task: Task,
        config: Arc<RunnerConfig>,
        deps: RunnerDeps,
        ledger: SharedLedger,
        permission_rx: mpsc::UnboundedReceiver<PermissionReply>,
    ) -> Self {
        Self {
            task,
            config,
            deps,
            ledger,
            permission_rx,
            base_url: None,
            progress: RunnerProgress::default(),
        }
    }

    /// Drive the task to a terminal state and return it
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>, deadline: Instant) -> Task {
        info!(task_id = %self.task.id, owner = %self.task.owner_id, "Runner started");

        let outcome = {
            let lifecycle = self.lifecycle();
            tokio::pin!(lifecycle);

            tokio::select! {
                biased;
                _ = cancel_requested(&mut cancel) => Outcome::Cancelled,
                _ = tokio::time::sleep_until(deadline) => Outcome::TimedOut,
                outcome = &mut lifecycle => outcome,
            }
        };

        self.finish(outcome).await;
        self.task
    }

    async fn lifecycle(&mut self) -> Outcome {
        match self.drive().await {
            Ok(outcome) => outcome,
            Err(error) => Outcome::Failed(error),
        }
    }

    async fn drive(&mut self) -> Result<Outcome, TaskError> {
        let container_id = self.start_container().await?;
        let base_url = self.resolve_agent_url(&container_id).await?;
        self.wait_until_healthy(&base_url).await?;

        let session_id = self.open_session(&base_url).await?;
        let events = self.subscribe(&base_url);
        self.dispatch_prompt(&base_url, &session_id).await?;

        Ok(self.stream(&base_url, &session_id, events).await)
    }

    // ------------------------------------------------------------------------
    // Lifecycle steps
    // ------------------------------------------------------------------------

    async fn start_container(&mut self) -> Result<String, TaskError> {
        let name = format!("agentbox-{}", self.task.id.0.simple());
        let spec = self
            .config
            .container
            .clone()
            .with_name(&name)
            .with_label(TASK_LABEL, self.task.id.to_string());

        self.ledger.lock().container_name = Some(name);
        let started = self.deps.provider.start(&spec).await;
        self.ledger.lock().container_name = None;

        let container_id = started.map_err(|e| {
            TaskError::with_message(TaskErrorCode::ContainerStartFailed, e.to_string())
        })?;
        self.ledger.lock().container_id = Some(container_id.clone());

        self.transition(
            TaskUpdate::status(TaskStatus::Starting)
                .with_container_id(&container_id)
                .with_started_at(Utc::now()),
        )
        .await;
        Ok(container_id)
    }

    async fn resolve_agent_url(&mut self, container_id: &str) -> Result<String, TaskError> {
        let info = self.deps.provider.inspect(container_id).await.map_err(|e| {
            TaskError::with_message(TaskErrorCode::ContainerPortUnavailable, e.to_string())
        })?;

        let port = info.host_port.ok_or_else(|| {
            TaskError::with_message(
                TaskErrorCode::ContainerPortUnavailable,
                format!("no host port published for {}", self.config.container.port_key()),
            )
        })?;

        self.persist(&TaskUpdate::default().with_container_port(port))
            .await;

        let base_url = format!("http://{}:{}", self.config.agent_host, port);
        debug!(task_id = %self.task.id, %base_url, "Agent endpoint resolved");
        self.base_url = Some(base_url.clone());
        Ok(base_url)
    }

    async fn wait_until_healthy(&self, base_url: &str) -> Result<(), TaskError> {
        let retries = self.config.health_check_retries.max(1);

        for attempt in 1..=retries {
            match self.deps.client.health(base_url).await {
                Ok(()) => {
                    debug!(task_id = %self.task.id, attempt, "Agent healthy");
                    return Ok(());
                }
                Err(e) => debug!(task_id = %self.task.id, attempt, "Agent not ready: {}", e),
            }

            if attempt < retries {
                tokio::time::sleep(self.config.health_check_interval).await;
            }
        }

        Err(TaskError::with_message(
            TaskErrorCode::HealthCheckTimeout,
            format!("agent not healthy after {} attempts", retries),
        ))
    }

    async fn open_session(&mut self, base_url: &str) -> Result<String, TaskError> {
        let session_id = self
            .deps
            .client
            .create_session(base_url)
            .await
            .map_err(|e| TaskError::with_message(TaskErrorCode::SessionCreateFailed, e.to_string()))?;

        self.transition(TaskUpdate::status(TaskStatus::Running).with_session_id(&session_id))
            .await;
        Ok(session_id)
    }

    fn subscribe(&mut self, base_url: &str) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let reader = self.deps.client.subscribe_events(base_url, tx);
        self.ledger.lock().reader = Some(reader);
        rx
    }

    async fn dispatch_prompt(&self, base_url: &str, session_id: &str) -> Result<(), TaskError> {
        let parts = [PromptPart::text(&self.task.instruction)];

        self.deps
            .client
            .send_prompt_async(base_url, session_id, &parts)
            .await
            .map_err(|e| {
                TaskError::with_message(TaskErrorCode::PromptDispatchFailed, e.to_string())
            })?;

        info!(task_id = %self.task.id, %session_id, "Prompt dispatched");
        Ok(())
    }

    async fn stream(
        &mut self,
        base_url: &str,
        session_id: &str,
        mut events: mpsc::UnboundedReceiver<SessionEvent>,
    ) -> Outcome {
        loop {
            tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => {
                        if let Some(outcome) = self.on_event(base_url, session_id, event).await {
                            return outcome;
                        }
                    }
                    None => {
                        return Outcome::Failed(TaskError::with_message(
                            TaskErrorCode::EventStreamClosed,
                            format!(
                                "event stream ended after {} events without a terminal signal",
                                self.progress.events_seen
                            ),
                        ));
                    }
                },
                Some(reply) = self.permission_rx.recv() => {
                    self.answer_permission(base_url, session_id, &reply.permission_id, reply.response)
                        .await;
                }
            }
        }
    }

    async fn on_event(
        &mut self,
        base_url: &str,
        session_id: &str,
        event: SessionEvent,
    ) -> Option<Outcome> {
        self.progress.events_seen += 1;
        self.progress.last_event_type = Some(event.event_type.clone());
        self.deps.sink.publish(
            self.task.id,
            TaskEvent::Session {
                event: event.clone(),
            },
        );

        if !event.concerns(session_id) {
            return None;
        }

        if event.is_idle() {
            return Some(Outcome::Completed);
        }

        if event.is_status() {
            match event.status() {
                Some(status) if status.is_active() => self.progress.seen_busy = true,
                Some(SessionStatusKind::Idle) if self.progress.seen_busy => {
                    return Some(Outcome::Completed);
                }
                _ => {}
            }
            return None;
        }

        if event.is_error() {
            let message = event
                .error_message()
                .unwrap_or_else(|| "agent reported a session error".to_string());
            return Some(Outcome::Failed(TaskError::with_message(
                TaskErrorCode::SessionError,
                message,
            )));
        }

        if let Some(request) = event.permission_request() {
            match self.deps.permissions.decide(&request) {
                PermissionDecision::Reply(response) => {
                    self.answer_permission(base_url, session_id, &request.id, response)
                        .await;
                }
                PermissionDecision::Surface => {
                    info!(
                        task_id = %self.task.id,
                        permission_id = %request.id,
                        title = request.title.as_deref().unwrap_or(""),
                        "Permission prompt awaiting operator"
                    );
                }
            }
        }

        None
    }

    async fn answer_permission(
        &self,
        base_url: &str,
        session_id: &str,
        permission_id: &str,
        response: PermissionResponse,
    ) {
        match self
            .deps
            .client
            .reply_permission(base_url, session_id, permission_id, response)
            .await
        {
            Ok(()) => info!(task_id = %self.task.id, %permission_id, %response, "Permission answered"),
            Err(e) => warn!(task_id = %self.task.id, %permission_id, "Permission reply failed: {}", e),
        }
    }

    // ------------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------------

    async fn finish(&mut self, outcome: Outcome) {
        let interrupted = matches!(outcome, Outcome::Cancelled | Outcome::TimedOut);
        let (status, error) = match outcome {
            Outcome::Completed => (TaskStatus::Completed, None),
            Outcome::Failed(error) => (TaskStatus::Failed, Some(error)),
            Outcome::Cancelled => (TaskStatus::Cancelled, None),
            Outcome::TimedOut => (
                TaskStatus::Failed,
                Some(TaskError::with_message(
                    TaskErrorCode::Timeout,
                    format!("deadline of {}s elapsed", self.config.task_timeout.as_secs_f64()),
                )),
            ),
        };

        if interrupted {
            self.abort_session().await;
        }

        release_resources(self.task.id, &self.ledger, self.deps.provider.as_ref()).await;

        let update = TaskUpdate::finish(status, error);
        if !TaskPolicy::can_transition(self.task.status, status) {
            warn!(task_id = %self.task.id, from = %self.task.status, to = %status, "Task already terminal");
            return;
        }
        self.persist(&update).await;
        self.ledger.lock().mark_finalized();

        info!(
            task_id = %self.task.id,
            status = %status,
            events = self.progress.events_seen,
            last_event = self.progress.last_event_type.as_deref().unwrap_or("-"),
            "Task finished"
        );
        self.deps
            .sink
            .publish(self.task.id, TaskEvent::status(status, self.task.error.clone()));
    }

    /// Best-effort abort of the agent session, bounded by `abort_timeout`
    async fn abort_session(&self) {
        let (Some(base_url), Some(session_id)) =
            (self.base_url.as_deref(), self.task.session_id.as_deref())
        else {
            return;
        };

        let abort = self.deps.client.abort_session(base_url, session_id);
        match tokio::time::timeout(self.config.abort_timeout, abort).await {
            Ok(Ok(acknowledged)) => {
                debug!(task_id = %self.task.id, acknowledged, "Session abort sent")
            }
            Ok(Err(e)) => warn!(task_id = %self.task.id, "Session abort failed: {}", e),
            Err(_) => warn!(task_id = %self.task.id, "Session abort timed out"),
        }
    }

    // ------------------------------------------------------------------------
    // State bookkeeping
    // ------------------------------------------------------------------------

    /// Move to a new status, persist it and publish it
    async fn transition(&mut self, update: TaskUpdate) {
        if let Some(to) = update.status {
            if !TaskPolicy::can_transition(self.task.status, to) {
                warn!(task_id = %self.task.id, from = %self.task.status, to = %to, "Illegal transition ignored");
                return;
            }
        }

        self.persist(&update).await;

        if let Some(status) = update.status {
            info!(task_id = %self.task.id, status = %status, "Task status changed");
            self.deps
                .sink
                .publish(self.task.id, TaskEvent::status(status, self.task.error.clone()));
        }
    }

    /// Apply to the local copy and the repository alike
    async fn persist(&mut self, update: &TaskUpdate) {
        update.apply_to(&mut self.task);
        if let Err(e) = self.deps.repository.update(self.task.id, update).await {
            warn!(task_id = %self.task.id, "Failed to persist task update: {}", e);
        }
    }
}

/// Resolves once cancellation is requested; never if the sender goes away
async fn cancel_requested(cancel: &mut watch::Receiver<bool>) {
    let closed = cancel.wait_for(|requested| *requested).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
