//! Task status and transition rules

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Possible states of a task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Admitted, runner not started yet
    Pending,

    /// Container created, waiting for the agent to come up
    Starting,

    /// Session created, prompt dispatched
    Running,

    /// Agent finished its turn
    Completed,

    /// Infrastructure, protocol or deadline failure
    Failed,

    /// Cancelled by the owner
    Cancelled,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Starting,
        TaskStatus::Running,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Starting => "starting",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state (cannot transition further)
    pub fn is_terminal(&self) -> bool {
        TaskPolicy::is_terminal(*self)
    }

    /// Get a symbol for the state (for terminal output)
    pub fn symbol(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "◯",
            TaskStatus::Starting => "◎",
            TaskStatus::Running => "⟳",
            TaskStatus::Completed => "✓",
            TaskStatus::Failed => "✗",
            TaskStatus::Cancelled => "⊘",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown task status: {}", s))
    }
}

// ============================================================================
// TaskPolicy
// ============================================================================

/// Pure rules over task status values
pub struct TaskPolicy;

impl TaskPolicy {
    /// Whether `status` is one of the six known values
    pub fn valid_status(status: &str) -> bool {
        status.parse::<TaskStatus>().is_ok()
    }

    pub fn is_cancellable(status: TaskStatus) -> bool {
        matches!(
            status,
            TaskStatus::Pending | TaskStatus::Starting | TaskStatus::Running
        )
    }

    pub fn is_terminal(status: TaskStatus) -> bool {
        matches!(
            status,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Legal edges of the lifecycle
    ///
    /// `pending -> starting -> running -> completed`, and any non-terminal
    /// state may fail or be cancelled. Terminal states accept nothing.
    pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;

        if Self::is_terminal(from) {
            return false;
        }
        matches!(
            (from, to),
            (Pending, Starting)
                | (Starting, Running)
                | (Running, Completed)
                | (_, Failed)
                | (_, Cancelled)
        )
    }
}
