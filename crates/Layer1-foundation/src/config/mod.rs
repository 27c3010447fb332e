//! Config - Agentbox settings
//!
//! - `types.rs` - `AgentboxConfig` and its sections
//! - `loader.rs` - layered loading (user → project → explicit file → env)

mod loader;
mod types;

pub use loader::{apply_env_overrides, ConfigLoader, CONFIG_DIR_NAME, CONFIG_FILE_NAME};
pub use types::{AgentboxConfig, ContainerSettings, TaskSettings};
