//! Task definition and types

use crate::state::TaskStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Unique identifier for a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new random TaskId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First eight hex digits, for container names and log lines
    pub fn short(&self) -> String {
        self.0.simple().to_string()[..8].to_string()
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

// ============================================================================
// TaskError
// ============================================================================

/// Stable failure codes recorded on failed tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskErrorCode {
    ContainerStartFailed,
    ContainerPortUnavailable,
    HealthCheckTimeout,
    SessionCreateFailed,
    PromptDispatchFailed,
    SessionError,
    EventStreamClosed,
    Timeout,
    RunnerCrashed,
}

impl TaskErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ContainerStartFailed => "container-start-failed",
            Self::ContainerPortUnavailable => "container-port-unavailable",
            Self::HealthCheckTimeout => "health-check-timeout",
            Self::SessionCreateFailed => "session-create-failed",
            Self::PromptDispatchFailed => "prompt-dispatch-failed",
            Self::SessionError => "session-error",
            Self::EventStreamClosed => "event-stream-closed",
            Self::Timeout => "timeout",
            Self::RunnerCrashed => "runner-crashed",
        }
    }
}

impl fmt::Display for TaskErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a task failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskError {
    pub code: TaskErrorCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TaskError {
    pub fn new(code: TaskErrorCode) -> Self {
        Self {
            code,
            message: None,
        }
    }

    pub fn with_message(code: TaskErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.code, message),
            None => write!(f, "{}", self.code),
        }
    }
}

// ============================================================================
// Task
// ============================================================================

/// One coding-agent session request and its progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Unique task identifier
    pub id: TaskId,

    /// Natural-language instruction sent to the agent
    pub instruction: String,

    /// Current state
    pub status: TaskStatus,

    /// Container ID once the container has been started
    pub container_id: Option<String>,

    /// Host port the agent server is published on
    pub container_port: Option<u16>,

    /// Agent session ID once the session has been created
    pub session_id: Option<String>,

    /// Owner the task is scoped to
    pub owner_id: String,

    /// Failure detail, only on failed tasks
    pub error: Option<TaskError>,

    /// When the runner began provisioning
    pub started_at: Option<DateTime<Utc>>,

    /// When the task reached a terminal state
    pub completed_at: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Create a new pending task
    pub fn new(instruction: impl Into<String>, owner_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: TaskId::new(),
            instruction: instruction.into(),
            status: TaskStatus::Pending,
            container_id: None,
            container_port: None,
            session_id: None,
            owner_id: owner_id.into(),
            error: None,
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Get execution duration if task has started
    pub fn duration(&self) -> Option<Duration> {
        let start = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - start).to_std().unwrap_or_default())
    }
}

// ============================================================================
// TaskUpdate
// ============================================================================

/// Partial update applied to a stored task and to the runner's own copy
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub container_id: Option<String>,
    pub container_port: Option<u16>,
    pub session_id: Option<String>,
    pub error: Option<TaskError>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Terminal update stamped with the current time
    pub fn finish(status: TaskStatus, error: Option<TaskError>) -> Self {
        Self {
            status: Some(status),
            error,
            completed_at: Some(Utc::now()),
            ..Default::default()
        }
    }

    pub fn with_container_id(mut self, container_id: impl Into<String>) -> Self {
        self.container_id = Some(container_id.into());
        self
    }

    pub fn with_container_port(mut self, port: u16) -> Self {
        self.container_port = Some(port);
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    /// Apply every present field to `task` and refresh `updated_at`
    pub fn apply_to(&self, task: &mut Task) {
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(container_id) = &self.container_id {
            task.container_id = Some(container_id.clone());
        }
        if let Some(port) = self.container_port {
            task.container_port = Some(port);
        }
        if let Some(session_id) = &self.session_id {
            task.session_id = Some(session_id.clone());
        }
        if self.error.is_some() {
            task.error = self.error.clone();
        }
        if let Some(at) = self.started_at {
            task.started_at = Some(at);
        }
        if let Some(at) = self.completed_at {
            task.completed_at = Some(at);
        }
        task.updated_at = Utc::now();
    }
}
