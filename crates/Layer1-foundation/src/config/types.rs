//! Agentbox Config - settings consumed at construction
//!
//! Every field has a default so a partial TOML file (or none at all) is valid.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// AgentboxConfig
// ============================================================================

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentboxConfig {
    /// Container image and sandbox limits
    pub container: ContainerSettings,

    /// Admission, timeouts and health checks
    pub tasks: TaskSettings,
}

impl AgentboxConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Reject values that would make every task fail or never be admitted
    pub fn validate(&self) -> Result<()> {
        if self.container.image.trim().is_empty() {
            return Err(Error::Config("container.image must not be empty".into()));
        }
        if self.container.agent_port == 0 {
            return Err(Error::Config("container.agent_port must be non-zero".into()));
        }
        if self.container.memory_mb == 0 {
            return Err(Error::Config("container.memory_mb must be non-zero".into()));
        }
        if self.container.memory_bytes().is_none() {
            return Err(Error::Config(format!(
                "container.memory_mb of {} is too large",
                self.container.memory_mb
            )));
        }
        if !(self.container.cpus.is_finite() && self.container.cpus > 0.0) {
            return Err(Error::Config(
                "container.cpus must be a positive number".into(),
            ));
        }
        if self.tasks.max_concurrent_tasks == 0 {
            return Err(Error::Config(
                "tasks.max_concurrent_tasks must be at least 1".into(),
            ));
        }
        if self.tasks.task_timeout_secs == 0 {
            return Err(Error::Config("tasks.task_timeout_secs must be non-zero".into()));
        }
        if self.tasks.health_check_retries == 0 {
            return Err(Error::Config(
                "tasks.health_check_retries must be at least 1".into(),
            ));
        }
        if self.tasks.http_timeout_secs == 0 {
            return Err(Error::Config("tasks.http_timeout_secs must be non-zero".into()));
        }
        Ok(())
    }
}

// ============================================================================
// Container settings
// ============================================================================

/// Image and sandbox settings for the per-task container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContainerSettings {
    /// Image reference running the coding agent server
    pub image: String,

    /// Port the agent listens on inside the container
    pub agent_port: u16,

    /// Command override (empty keeps the image entrypoint)
    pub command: Vec<String>,

    /// Memory limit in MiB
    pub memory_mb: u64,

    /// CPU limit in cores
    pub cpus: f64,

    /// Maximum number of processes
    pub pids_limit: i64,

    /// Non-root user the agent runs as
    pub user: String,

    /// Mount the root filesystem read-only
    pub read_only_rootfs: bool,

    /// Grace period given to `stop` before the engine kills the container
    pub stop_timeout_secs: u64,
}

impl Default for ContainerSettings {
    fn default() -> Self {
        Self {
            image: "ghcr.io/sst/opencode:latest".to_string(),
            agent_port: 4096,
            command: vec![
                "opencode".to_string(),
                "serve".to_string(),
                "--hostname".to_string(),
                "0.0.0.0".to_string(),
                "--port".to_string(),
                "4096".to_string(),
            ],
            memory_mb: 2048,
            cpus: 2.0,
            pids_limit: 256,
            user: "1000:1000".to_string(),
            read_only_rootfs: false,
            stop_timeout_secs: 5,
        }
    }
}

impl ContainerSettings {
    /// Memory limit in bytes; `None` when it does not fit the engine's `i64`
    pub fn memory_bytes(&self) -> Option<i64> {
        i64::try_from(self.memory_mb)
            .ok()
            .and_then(|mb| mb.checked_mul(1024 * 1024))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

// ============================================================================
// Task settings
// ============================================================================

/// Admission control, deadlines and protocol timeouts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    /// Simultaneously active tasks allowed per owner
    pub max_concurrent_tasks: usize,

    /// Per-task deadline, measured from admission
    pub task_timeout_secs: u64,

    /// Health checks attempted before giving up
    pub health_check_retries: u32,

    /// Sleep between health checks
    pub health_check_interval_ms: u64,

    /// Per-call timeout for non-streaming HTTP requests
    pub http_timeout_secs: u64,

    /// Bound on the best-effort abort call during cancellation
    pub abort_timeout_secs: u64,

    /// Host the container port is published on
    pub agent_host: String,
}

impl Default for TaskSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 3,
            task_timeout_secs: 30 * 60,
            health_check_retries: 30,
            health_check_interval_ms: 1000,
            http_timeout_secs: 30,
            abort_timeout_secs: 5,
            agent_host: "127.0.0.1".to_string(),
        }
    }
}

impl TaskSettings {
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn abort_timeout(&self) -> Duration {
        Duration::from_secs(self.abort_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AgentboxConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tasks.agent_host, "127.0.0.1");
        assert_eq!(config.container.memory_bytes(), Some(2048 * 1024 * 1024));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = AgentboxConfig::from_toml_str(
            r#"
            [tasks]
            max_concurrent_tasks = 5
            health_check_interval_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.tasks.max_concurrent_tasks, 5);
        assert_eq!(
            config.tasks.health_check_interval(),
            Duration::from_millis(250)
        );
        assert_eq!(config.tasks.health_check_retries, 30);
        assert_eq!(config.container, ContainerSettings::default());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let mut config = AgentboxConfig::default();
        config.tasks.max_concurrent_tasks = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = AgentboxConfig::default();
        config.container.image = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = AgentboxConfig::default();
        config.tasks.health_check_retries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unusable_container_limits() {
        let mut config = AgentboxConfig::default();
        config.container.memory_mb = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = AgentboxConfig::default();
        config.container.memory_mb = u64::MAX / 1024;
        assert_eq!(config.container.memory_bytes(), None);
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        for cpus in [0.0, -1.5, f64::NAN, f64::INFINITY] {
            let mut config = AgentboxConfig::default();
            config.container.cpus = cpus;
            assert!(config.validate().is_err(), "cpus = {}", cpus);
        }

        let mut config = AgentboxConfig::default();
        config.container.cpus = 0.5;
        config.container.memory_mb = 1;
        assert!(config.validate().is_ok());
        assert_eq!(config.container.memory_bytes(), Some(1024 * 1024));
    }

    #[test]
    fn test_toml_roundtrip_is_stable() {
        let config = AgentboxConfig::default();
        let rendered = config.to_toml_string().unwrap();
        assert!(rendered.contains("[container]"));
        assert_eq!(AgentboxConfig::from_toml_str(&rendered).unwrap(), config);
    }
}
