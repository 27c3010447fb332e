//! Outward event stream
//!
//! Runners publish status transitions and every agent event through an
//! `EventSink`. `EventBus` is the broadcast implementation: each envelope is
//! stamped with a process-wide sequence number.

use crate::state::TaskStatus;
use crate::task::{TaskError, TaskId};
use agentbox_session::SessionEvent;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::trace;

/// Something that happened to a task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskEvent {
    /// The task moved to `status`
    Status {
        status: TaskStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<TaskError>,
    },

    /// An agent event, forwarded unmodified
    Session { event: SessionEvent },
}

impl TaskEvent {
    pub fn status(status: TaskStatus, error: Option<TaskError>) -> Self {
        TaskEvent::Status { status, error }
    }

    /// Terminal status carried by this event, if any
    pub fn terminal_status(&self) -> Option<TaskStatus> {
        match self {
            TaskEvent::Status { status, .. } if status.is_terminal() => Some(*status),
            _ => None,
        }
    }
}

/// Receiver of task events
///
/// `publish` must not block: runners call it inline between protocol steps.
pub trait EventSink: Send + Sync {
    fn publish(&self, task_id: TaskId, event: TaskEvent);
}

// ============================================================================
// EventBus
// ============================================================================

/// Sequenced event as delivered to bus subscribers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskEnvelope {
    pub sequence: u64,
    pub task_id: TaskId,
    pub event: TaskEvent,
}

/// Broadcast event sink
pub struct EventBus {
    sender: broadcast::Sender<TaskEnvelope>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(1024)
    }

    /// Subscribers lagging by more than `capacity` envelopes miss the oldest
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEnvelope> {
        self.sender.subscribe()
    }

    /// Envelopes published so far
    pub fn published(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for EventBus {
    fn publish(&self, task_id: TaskId, event: TaskEvent) {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let envelope = TaskEnvelope {
            sequence,
            task_id,
            event,
        };

        if self.sender.send(envelope).is_err() {
            trace!(%task_id, sequence, "No event subscribers");
        }
    }
}
