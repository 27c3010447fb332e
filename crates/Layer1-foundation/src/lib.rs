//! # agentbox-foundation
//!
//! Foundation layer for Agentbox:
//! - Error: the public error taxonomy shared by every layer
//! - Config: `AgentboxConfig` and the layered TOML/env loader
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  agentbox-cli (Layer4)                               │
//! │                     │                                │
//! │                     ▼                                │
//! │  agentbox-task (Layer2)  ──►  agentbox-session       │
//! │   runner / supervisor         HTTP + SSE client      │
//! │   gate / container                                   │
//! │                     │                                │
//! │                     ▼                                │
//! │  agentbox-foundation (Layer1): Error, Config         │
//! └──────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod error;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    AgentboxConfig, ConfigLoader, ContainerSettings, TaskSettings, CONFIG_DIR_NAME,
    CONFIG_FILE_NAME,
};
