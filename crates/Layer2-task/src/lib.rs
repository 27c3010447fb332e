//! # agentbox-task
//!
//! Task lifecycle for Agentbox: every task runs a coding agent inside its own
//! disposable container and is driven to a terminal state by a runner.
//!
//! ## Features
//!
//! - Per-owner admission control
//! - Hardened Docker containers with loopback-only agent ports
//! - Runner state machine with cancel and deadline handling
//! - Supervision: crashed runners are cleaned up and recorded
//! - Ordered event stream of status changes and agent events

pub mod container;
pub mod event;
pub mod gate;
pub mod manager;
pub mod permission;
pub mod repository;
pub mod runner;
pub mod state;
pub mod supervisor;
pub mod task;

// Task model
pub use state::{TaskPolicy, TaskStatus};
pub use task::{Task, TaskError, TaskErrorCode, TaskId, TaskUpdate};

// Orchestration
pub use gate::{CapacitySlot, ConcurrencyGate};
pub use manager::TaskManager;
pub use runner::{PermissionReply, RunnerConfig, RunnerDeps, TaskRunner};
pub use supervisor::TaskSupervisor;

// Persistence and events
pub use event::{EventBus, EventSink, TaskEnvelope, TaskEvent};
pub use repository::{InMemoryTaskRepository, TaskRepository};

// Permissions
pub use permission::{AutoApprove, PermissionDecision, PermissionPolicy, SurfaceToOperator};

// Container system
pub use container::{
    ContainerError, ContainerInfo, ContainerProvider, ContainerResult, ContainerSpec,
    DockerProvider, ResourceLimits, SecurityProfile,
};
