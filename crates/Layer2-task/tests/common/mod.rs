//! In-process fakes for driving the task lifecycle without Docker or an agent

#![allow(dead_code)]

use agentbox_session::{
    EventReader, EventSender, PermissionResponse, PromptPart, SessionClient, SessionError,
    SessionEvent, SessionResult,
};
use agentbox_task::{
    AutoApprove, ContainerError, ContainerInfo, ContainerProvider, ContainerResult,
    ContainerSpec, EventSink, InMemoryTaskRepository, PermissionPolicy, RunnerConfig, RunnerDeps,
    Task, TaskEvent, TaskId, TaskManager, TaskStatus,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SESSION_ID: &str = "ses-1";
pub const OWNER: &str = "alice";

// ============================================================================
// FakeProvider
// ============================================================================

pub struct FakeProvider {
    fail_start: bool,
    hang_start: bool,
    host_port: Option<u16>,
    next_id: AtomicUsize,
    running: Mutex<HashSet<String>>,
    pub specs: Mutex<Vec<ContainerSpec>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub removes: AtomicUsize,
    pub removed: Mutex<Vec<String>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            fail_start: false,
            hang_start: false,
            host_port: Some(41000),
            next_id: AtomicUsize::new(0),
            running: Mutex::new(HashSet::new()),
            specs: Mutex::new(Vec::new()),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            removes: AtomicUsize::new(0),
            removed: Mutex::new(Vec::new()),
        }
    }

    /// The engine never answers the create call
    pub fn hanging_start() -> Self {
        Self {
            hang_start: true,
            ..Self::new()
        }
    }

    pub fn failing_start() -> Self {
        Self {
            fail_start: true,
            ..Self::new()
        }
    }

    pub fn without_port() -> Self {
        Self {
            host_port: None,
            ..Self::new()
        }
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.running.lock().len()
    }

    pub fn removed(&self) -> Vec<String> {
        self.removed.lock().clone()
    }
}

#[async_trait]
impl ContainerProvider for FakeProvider {
    async fn start(&self, spec: &ContainerSpec) -> ContainerResult<String> {
        self.specs.lock().push(spec.clone());
        if self.fail_start {
            return Err(ContainerError::StartFailed("image has no entrypoint".into()));
        }
        if self.hang_start {
            std::future::pending::<()>().await;
        }

        let id = format!("container-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.running.lock().insert(id.clone());
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(id)
    }

    async fn inspect(&self, id: &str) -> ContainerResult<ContainerInfo> {
        let running = self.running.lock().contains(id);
        Ok(ContainerInfo {
            id: id.to_string(),
            running,
            host_port: self.host_port,
        })
    }

    async fn stop(&self, id: &str) -> ContainerResult<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        self.running.lock().remove(id);
        Ok(())
    }

    async fn remove(&self, id: &str) -> ContainerResult<()> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.removed.lock().push(id.to_string());
        self.running.lock().remove(id);
        Ok(())
    }
}

// ============================================================================
// FakeSessionClient
// ============================================================================

pub struct FakeSessionClient {
    healthy: bool,
    hang_health: bool,
    fail_create: bool,
    fail_prompt: bool,
    script: Vec<SessionEvent>,
    hold_open: bool,
    pub health_calls: AtomicUsize,
    pub abort_calls: AtomicUsize,
    pub prompts: Mutex<Vec<Vec<PromptPart>>>,
    pub replies: Mutex<Vec<(String, PermissionResponse)>>,
}

impl FakeSessionClient {
    /// Healthy agent whose stream stays open after the scripted events
    pub fn new(script: Vec<SessionEvent>) -> Self {
        Self {
            healthy: true,
            hang_health: false,
            fail_create: false,
            fail_prompt: false,
            script,
            hold_open: true,
            health_calls: AtomicUsize::new(0),
            abort_calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            replies: Mutex::new(Vec::new()),
        }
    }

    pub fn closing_stream(mut self) -> Self {
        self.hold_open = false;
        self
    }

    pub fn unhealthy(mut self) -> Self {
        self.healthy = false;
        self
    }

    /// Health checks never get a response
    pub fn hanging_health(mut self) -> Self {
        self.hang_health = true;
        self
    }

    pub fn failing_create(mut self) -> Self {
        self.fail_create = true;
        self
    }

    pub fn failing_prompt(mut self) -> Self {
        self.fail_prompt = true;
        self
    }

    pub fn health_calls(&self) -> usize {
        self.health_calls.load(Ordering::SeqCst)
    }

    pub fn abort_calls(&self) -> usize {
        self.abort_calls.load(Ordering::SeqCst)
    }

    pub fn replies(&self) -> Vec<(String, PermissionResponse)> {
        self.replies.lock().clone()
    }
}

#[async_trait]
impl SessionClient for FakeSessionClient {
    async fn health(&self, _base_url: &str) -> SessionResult<()> {
        self.health_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_health {
            std::future::pending::<()>().await;
        }
        if self.healthy {
            Ok(())
        } else {
            Err(SessionError::Transport("connection refused".into()))
        }
    }

    async fn create_session(&self, _base_url: &str) -> SessionResult<String> {
        if self.fail_create {
            return Err(SessionError::status("session", 500, "boom"));
        }
        Ok(SESSION_ID.to_string())
    }

    async fn send_prompt_async(
        &self,
        _base_url: &str,
        _session_id: &str,
        parts: &[PromptPart],
    ) -> SessionResult<()> {
        if self.fail_prompt {
            return Err(SessionError::status("prompt_async", 500, "boom"));
        }
        self.prompts.lock().push(parts.to_vec());
        Ok(())
    }

    async fn abort_session(&self, _base_url: &str, _session_id: &str) -> SessionResult<bool> {
        self.abort_calls.fetch_add(1, Ordering::SeqCst);
        Err(SessionError::Transport("agent went away".into()))
    }

    async fn reply_permission(
        &self,
        _base_url: &str,
        _session_id: &str,
        permission_id: &str,
        response: PermissionResponse,
    ) -> SessionResult<()> {
        self.replies
            .lock()
            .push((permission_id.to_string(), response));
        Ok(())
    }

    fn subscribe_events(&self, _base_url: &str, sink: EventSender) -> EventReader {
        let script = self.script.clone();
        let hold_open = self.hold_open;

        EventReader::spawn(async move {
            for event in script {
                if sink.send(event).is_err() {
                    return;
                }
            }
            if hold_open {
                std::future::pending::<()>().await;
            }
            drop(sink);
        })
    }
}

// ============================================================================
// Sinks
// ============================================================================

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<(TaskId, TaskEvent)>>,
}

impl RecordingSink {
    pub fn statuses(&self, task_id: TaskId) -> Vec<TaskStatus> {
        self.events
            .lock()
            .iter()
            .filter(|(id, _)| *id == task_id)
            .filter_map(|(_, event)| match event {
                TaskEvent::Status { status, .. } => Some(*status),
                _ => None,
            })
            .collect()
    }

    pub fn session_event_types(&self, task_id: TaskId) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .filter(|(id, _)| *id == task_id)
            .filter_map(|(_, event)| match event {
                TaskEvent::Session { event } => Some(event.event_type.clone()),
                _ => None,
            })
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn publish(&self, task_id: TaskId, event: TaskEvent) {
        self.events.lock().push((task_id, event));
    }
}

/// Panics on the first agent event it sees
#[derive(Default)]
pub struct PanickingSink {
    inner: RecordingSink,
}

impl PanickingSink {
    pub fn statuses(&self, task_id: TaskId) -> Vec<TaskStatus> {
        self.inner.statuses(task_id)
    }
}

impl EventSink for PanickingSink {
    fn publish(&self, task_id: TaskId, event: TaskEvent) {
        if matches!(event, TaskEvent::Session { .. }) {
            panic!("sink exploded");
        }
        self.inner.publish(task_id, event);
    }
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub manager: TaskManager,
    pub provider: Arc<FakeProvider>,
    pub client: Arc<FakeSessionClient>,
    pub repository: Arc<InMemoryTaskRepository>,
}

pub fn runner_config() -> RunnerConfig {
    RunnerConfig::default()
        .with_task_timeout(Duration::from_secs(10))
        .with_health_checks(2, Duration::from_millis(10))
        .with_abort_timeout(Duration::from_millis(200))
}

pub fn harness(
    provider: FakeProvider,
    client: FakeSessionClient,
    sink: Arc<dyn EventSink>,
) -> Harness {
    harness_with(
        provider,
        client,
        sink,
        Arc::new(AutoApprove::default()),
        runner_config(),
        4,
    )
}

pub fn harness_with(
    provider: FakeProvider,
    client: FakeSessionClient,
    sink: Arc<dyn EventSink>,
    permissions: Arc<dyn PermissionPolicy>,
    config: RunnerConfig,
    max_concurrent: usize,
) -> Harness {
    let provider = Arc::new(provider);
    let client = Arc::new(client);
    let repository = Arc::new(InMemoryTaskRepository::new());

    let deps = RunnerDeps {
        repository: repository.clone(),
        provider: provider.clone(),
        client: client.clone(),
        sink,
        permissions,
    };

    Harness {
        manager: TaskManager::new(config, max_concurrent, deps),
        provider,
        client,
        repository,
    }
}

impl Harness {
    /// Wait for a terminal task, failing the test after five seconds
    pub async fn finished(&self, task: &Task) -> Task {
        self.manager
            .wait(task.id, Duration::from_secs(5))
            .await
            .expect("task did not reach a terminal state")
    }

    /// Poll until the stored task has `status`
    pub async fn reach(&self, task: &Task, status: TaskStatus) {
        for _ in 0..200 {
            let current = self.manager.get_task(task.id, &task.owner_id).await;
            if matches!(current, Ok(ref t) if t.status == status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task never reached {}", status);
    }

    /// Poll until the supervisor has reaped every runner
    pub async fn drained(&self) {
        for _ in 0..200 {
            if self.manager.live_runners().await == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("runners were never reaped");
    }
}

// ============================================================================
// Agent events
// ============================================================================

pub fn status_event(kind: &str) -> SessionEvent {
    SessionEvent::new(
        "session.status",
        json!({"type": "session.status", "properties": {"sessionID": SESSION_ID, "status": {"type": kind}}}),
    )
}

pub fn idle_event() -> SessionEvent {
    SessionEvent::new(
        "session.idle",
        json!({"type": "session.idle", "properties": {"sessionID": SESSION_ID}}),
    )
}

pub fn part_event(text: &str) -> SessionEvent {
    SessionEvent::new(
        "message.part.updated",
        json!({"type": "message.part.updated", "properties": {"part": {"sessionID": SESSION_ID, "type": "text", "text": text}}}),
    )
}

pub fn error_event(message: &str) -> SessionEvent {
    SessionEvent::new(
        "session.error",
        json!({"type": "session.error", "properties": {"sessionID": SESSION_ID, "error": {"name": "ProviderError", "data": {"message": message}}}}),
    )
}

pub fn permission_event(id: &str) -> SessionEvent {
    SessionEvent::new(
        "permission.updated",
        json!({"type": "permission.updated", "properties": {"id": id, "sessionID": SESSION_ID, "type": "bash", "title": "Run ls"}}),
    )
}

pub fn foreign_idle_event() -> SessionEvent {
    SessionEvent::new(
        "session.idle",
        json!({"type": "session.idle", "properties": {"sessionID": "ses-other"}}),
    )
}
