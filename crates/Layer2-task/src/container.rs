//! Container provisioning
//!
//! Every task gets exactly one container running the coding agent server.
//!
//! Features:
//! - Agent port published on loopback only, random host port
//! - Resource limits (CPU, memory, pids, read-only rootfs)
//! - Security profile (dropped capabilities, no-new-privileges, non-root user)
//! - Image pulled on demand
//! - Idempotent stop/remove

use agentbox_foundation::ContainerSettings;
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, PortBinding, PortMap};
use bollard::Docker;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Label set on every container this crate creates
pub const MANAGED_LABEL: &str = "agentbox.managed";
/// Label carrying the owning task id
pub const TASK_LABEL: &str = "agentbox.task_id";
/// Host interface the agent port is published on
pub const LOOPBACK: &str = "127.0.0.1";

/// Result alias for container operations
pub type ContainerResult<T> = std::result::Result<T, ContainerError>;

/// Container engine failures
#[derive(Error, Debug, Clone)]
pub enum ContainerError {
    #[error("Container engine unavailable: {0}")]
    Unavailable(String),

    #[error("Image not found: {0}")]
    ImageNotFound(String),

    #[error("Failed to create container: {0}")]
    CreateFailed(String),

    #[error("Failed to start container: {0}")]
    StartFailed(String),

    #[error("Container not found: {0}")]
    NotFound(String),

    #[error("Container engine error: {0}")]
    Engine(String),
}

impl From<ContainerError> for agentbox_foundation::Error {
    fn from(err: ContainerError) -> Self {
        agentbox_foundation::Error::Internal(format!("container: {}", err))
    }
}

// ============================================================================
// ContainerSpec
// ============================================================================

/// Resource limits for a task container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Memory limit in bytes
    pub memory_bytes: Option<i64>,
    /// CPU limit (number of cores, e.g., 1.5)
    pub cpus: Option<f64>,
    /// PIDs limit
    pub pids_limit: Option<i64>,
    /// Read-only root filesystem
    pub read_only_rootfs: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_bytes: Some(2048 * 1024 * 1024),
            cpus: Some(2.0),
            pids_limit: Some(256),
            read_only_rootfs: false,
        }
    }
}

impl ResourceLimits {
    fn nano_cpus(&self) -> Option<i64> {
        self.cpus.map(|cpus| (cpus * 1_000_000_000.0) as i64)
    }
}

/// Security profile for a task container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityProfile {
    /// Capabilities to drop
    pub drop_caps: Vec<String>,
    /// Run as this user instead of the image default
    pub user: Option<String>,
    /// No new privileges
    pub no_new_privileges: bool,
}

impl Default for SecurityProfile {
    fn default() -> Self {
        Self {
            drop_caps: vec!["ALL".to_string()],
            user: Some("1000:1000".to_string()),
            no_new_privileges: true,
        }
    }
}

impl SecurityProfile {
    fn security_opts(&self) -> Option<Vec<String>> {
        if self.no_new_privileges {
            Some(vec!["no-new-privileges:true".to_string()])
        } else {
            None
        }
    }
}

/// Everything needed to create one task container
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerSpec {
    /// Container image
    pub image: String,
    /// Container name (engine-generated if None)
    pub name: Option<String>,
    /// Port the agent server listens on inside the container
    pub agent_port: u16,
    /// Command to run
    pub command: Vec<String>,
    /// Environment variables
    pub env: HashMap<String, String>,
    /// Labels
    pub labels: HashMap<String, String>,
    /// Resource limits
    pub limits: ResourceLimits,
    /// Security profile
    pub security: SecurityProfile,
}

impl ContainerSpec {
    pub fn new(image: impl Into<String>, agent_port: u16) -> Self {
        let mut labels = HashMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());

        Self {
            image: image.into(),
            name: None,
            agent_port,
            command: vec![],
            env: HashMap::new(),
            labels,
            limits: ResourceLimits::default(),
            security: SecurityProfile::default(),
        }
    }

    /// Build the template spec from the `[container]` config section
    pub fn from_settings(settings: &ContainerSettings) -> Self {
        let mut spec = Self::new(&settings.image, settings.agent_port)
            .with_command(settings.command.clone())
            .with_limits(ResourceLimits {
                memory_bytes: settings.memory_bytes(),
                cpus: Some(settings.cpus),
                pids_limit: Some(settings.pids_limit),
                read_only_rootfs: settings.read_only_rootfs,
            });

        spec.security.user = if settings.user.is_empty() {
            None
        } else {
            Some(settings.user.clone())
        };
        spec
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_command(mut self, cmd: Vec<String>) -> Self {
        self.command = cmd;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_security(mut self, security: SecurityProfile) -> Self {
        self.security = security;
        self
    }

    /// Engine key of the agent port, e.g. `4096/tcp`
    pub fn port_key(&self) -> String {
        format!("{}/tcp", self.agent_port)
    }

    /// Build the engine's create configuration
    pub fn to_docker_config(&self) -> Config<String> {
        let port_key = self.port_key();

        let mut exposed_ports = HashMap::new();
        exposed_ports.insert(port_key.clone(), HashMap::new());

        // Empty host port lets the engine pick a free one
        let mut port_bindings: PortMap = HashMap::new();
        port_bindings.insert(
            port_key,
            Some(vec![PortBinding {
                host_ip: Some(LOOPBACK.to_string()),
                host_port: Some(String::new()),
            }]),
        );

        let mut env: Vec<String> = self
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        env.sort();

        Config {
            image: Some(self.image.clone()),
            cmd: if self.command.is_empty() {
                None
            } else {
                Some(self.command.clone())
            },
            env: if env.is_empty() { None } else { Some(env) },
            labels: Some(self.labels.clone()),
            user: self.security.user.clone(),
            exposed_ports: Some(exposed_ports),
            host_config: Some(HostConfig {
                port_bindings: Some(port_bindings),
                memory: self.limits.memory_bytes,
                nano_cpus: self.limits.nano_cpus(),
                pids_limit: self.limits.pids_limit,
                readonly_rootfs: Some(self.limits.read_only_rootfs),
                cap_drop: Some(self.security.drop_caps.clone()),
                security_opt: self.security.security_opts(),
                auto_remove: Some(false),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

/// Inspection result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub id: String,
    pub running: bool,
    /// Host port the agent port is published on
    pub host_port: Option<u16>,
}

// ============================================================================
// ContainerProvider trait
// ============================================================================

/// Container engine operations needed by a task runner
#[async_trait]
pub trait ContainerProvider: Send + Sync {
    /// Create and start a container, returning its id
    ///
    /// Does not wait for the agent inside to become ready.
    async fn start(&self, spec: &ContainerSpec) -> ContainerResult<String>;

    /// Current state and published agent port
    async fn inspect(&self, id: &str) -> ContainerResult<ContainerInfo>;

    /// Stop a container; already stopped or missing is success
    async fn stop(&self, id: &str) -> ContainerResult<()>;

    /// Force-remove a container; missing or already being removed is success
    async fn remove(&self, id: &str) -> ContainerResult<()>;
}

// ============================================================================
// DockerProvider
// ============================================================================

/// Docker engine provider backed by `bollard`
pub struct DockerProvider {
    docker: Docker,
    agent_port_key: Option<String>,
    stop_timeout: Duration,
}

impl DockerProvider {
    /// Connect to the local engine (socket, named pipe or `DOCKER_HOST`)
    pub fn connect() -> ContainerResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| ContainerError::Unavailable(e.to_string()))?;

        Ok(Self {
            docker,
            agent_port_key: None,
            stop_timeout: Duration::from_secs(5),
        })
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Restrict `inspect` to one port key instead of the first published port
    pub fn with_agent_port(mut self, port: u16) -> Self {
        self.agent_port_key = Some(format!("{}/tcp", port));
        self
    }

    /// Check the engine answers
    pub async fn ping(&self) -> ContainerResult<()> {
        self.docker
            .ping()
            .await
            .map(|_| ())
            .map_err(|e| ContainerError::Unavailable(e.to_string()))
    }

    async fn create(&self, spec: &ContainerSpec) -> Result<String, BollardError> {
        let options = spec.name.clone().map(|name| CreateContainerOptions {
            name,
            platform: None,
        });

        let response = self
            .docker
            .create_container(options, spec.to_docker_config())
            .await?;

        for warning in &response.warnings {
            warn!("Container create warning: {}", warning);
        }
        Ok(response.id)
    }

    async fn pull_image(&self, image: &str) -> ContainerResult<()> {
        info!("Pulling image: {}", image);

        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };
        let mut progress = self.docker.create_image(Some(options), None, None);

        while let Some(step) = progress.next().await {
            match step {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!("pull {}: {}", image, status);
                    }
                }
                Err(e) => {
                    return Err(if status_code(&e) == Some(404) {
                        ContainerError::ImageNotFound(image.to_string())
                    } else {
                        ContainerError::Engine(e.to_string())
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerProvider for DockerProvider {
    async fn start(&self, spec: &ContainerSpec) -> ContainerResult<String> {
        let id = match self.create(spec).await {
            Ok(id) => id,
            Err(e) if status_code(&e) == Some(404) => {
                // Engine reports the image missing
                self.pull_image(&spec.image).await?;
                self.create(spec)
                    .await
                    .map_err(|e| ContainerError::CreateFailed(e.to_string()))?
            }
            Err(e) => return Err(ContainerError::CreateFailed(e.to_string())),
        };

        if let Err(e) = self
            .docker
            .start_container(&id, None::<StartContainerOptions<String>>)
            .await
        {
            warn!("Start failed, removing container {}: {}", id, e);
            if let Err(remove_err) = self.remove(&id).await {
                warn!("Failed to remove unstarted container {}: {}", id, remove_err);
            }
            return Err(ContainerError::StartFailed(e.to_string()));
        }

        info!("Started container {} from {}", id, spec.image);
        Ok(id)
    }

    async fn inspect(&self, id: &str) -> ContainerResult<ContainerInfo> {
        let response = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| match status_code(&e) {
                Some(404) => ContainerError::NotFound(id.to_string()),
                _ => ContainerError::Engine(e.to_string()),
            })?;

        let running = response
            .state
            .as_ref()
            .and_then(|state| state.running)
            .unwrap_or(false);
        let host_port = response
            .network_settings
            .and_then(|settings| settings.ports)
            .and_then(|ports| published_port(&ports, self.agent_port_key.as_deref()));

        Ok(ContainerInfo {
            id: id.to_string(),
            running,
            host_port,
        })
    }

    async fn stop(&self, id: &str) -> ContainerResult<()> {
        let options = StopContainerOptions {
            t: self.stop_timeout.as_secs() as i64,
        };

        match self.docker.stop_container(id, Some(options)).await {
            Ok(()) => {
                debug!("Stopped container {}", id);
                Ok(())
            }
            Err(e) if is_benign_stop(&e) => Ok(()),
            Err(e) => Err(ContainerError::Engine(e.to_string())),
        }
    }

    async fn remove(&self, id: &str) -> ContainerResult<()> {
        let options = RemoveContainerOptions {
            force: true,
            v: true,
            ..Default::default()
        };

        match self.docker.remove_container(id, Some(options)).await {
            Ok(()) => {
                debug!("Removed container {}", id);
                Ok(())
            }
            Err(e) if is_benign_remove(&e) => Ok(()),
            Err(e) => Err(ContainerError::Engine(e.to_string())),
        }
    }
}

fn status_code(error: &BollardError) -> Option<u16> {
    match error {
        BollardError::DockerResponseServerError { status_code, .. } => Some(*status_code),
        _ => None,
    }
}

/// 304 (already stopped) and 404 (gone)
fn is_benign_stop(error: &BollardError) -> bool {
    matches!(status_code(error), Some(304) | Some(404))
}

/// 404 (gone) and 409 (removal already in progress)
fn is_benign_remove(error: &BollardError) -> bool {
    matches!(status_code(error), Some(404) | Some(409))
}

/// Host port bound for `port_key`, or the first bound port when no key is given
fn published_port(ports: &PortMap, port_key: Option<&str>) -> Option<u16> {
    let parse = |bindings: &Option<Vec<PortBinding>>| {
        bindings.as_ref()?.iter().find_map(|binding| {
            binding
                .host_port
                .as_deref()
                .and_then(|port| port.parse::<u16>().ok())
                .filter(|port| *port != 0)
        })
    };

    match port_key {
        Some(key) => ports.get(key).and_then(parse),
        None => {
            let mut keys: Vec<&String> = ports.keys().collect();
            keys.sort();
            keys.into_iter().find_map(|key| ports.get(key).and_then(parse))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error(status_code: u16) -> BollardError {
        BollardError::DockerResponseServerError {
            status_code,
            message: "engine says no".to_string(),
        }
    }

    #[test]
    fn test_docker_config_hardening() {
        let spec = ContainerSpec::new("ghcr.io/sst/opencode:latest", 4096)
            .with_command(vec!["opencode".to_string(), "serve".to_string()])
            .with_env("FOO", "bar")
            .with_label(TASK_LABEL, "t1");

        let config = spec.to_docker_config();
        let host = config.host_config.as_ref().unwrap();

        assert_eq!(config.image.as_deref(), Some("ghcr.io/sst/opencode:latest"));
        assert_eq!(config.user.as_deref(), Some("1000:1000"));
        assert_eq!(config.env, Some(vec!["FOO=bar".to_string()]));
        assert!(config.exposed_ports.as_ref().unwrap().contains_key("4096/tcp"));
        assert_eq!(config.labels.as_ref().unwrap()[MANAGED_LABEL], "true");
        assert_eq!(config.labels.as_ref().unwrap()[TASK_LABEL], "t1");

        assert_eq!(host.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(
            host.security_opt,
            Some(vec!["no-new-privileges:true".to_string()])
        );
        assert_eq!(host.nano_cpus, Some(2_000_000_000));
        assert_eq!(host.pids_limit, Some(256));

        let binding = &host.port_bindings.as_ref().unwrap()["4096/tcp"]
            .as_ref()
            .unwrap()[0];
        assert_eq!(binding.host_ip.as_deref(), Some(LOOPBACK));
        assert_eq!(binding.host_port.as_deref(), Some(""));
    }

    #[test]
    fn test_from_settings() {
        let settings = ContainerSettings {
            user: String::new(),
            memory_mb: 512,
            read_only_rootfs: true,
            ..Default::default()
        };
        let spec = ContainerSpec::from_settings(&settings);

        assert_eq!(spec.image, settings.image);
        assert_eq!(spec.agent_port, settings.agent_port);
        assert_eq!(spec.limits.memory_bytes, Some(512 * 1024 * 1024));
        assert!(spec.limits.read_only_rootfs);
        assert!(spec.security.user.is_none());
        assert!(spec.to_docker_config().user.is_none());
    }

    #[test]
    fn test_stop_and_remove_status_mapping() {
        assert!(is_benign_stop(&server_error(304)));
        assert!(is_benign_stop(&server_error(404)));
        assert!(!is_benign_stop(&server_error(500)));
        assert!(!is_benign_stop(&server_error(409)));

        assert!(is_benign_remove(&server_error(404)));
        assert!(is_benign_remove(&server_error(409)));
        assert!(!is_benign_remove(&server_error(304)));
        assert!(!is_benign_remove(&server_error(500)));
    }

    #[test]
    fn test_published_port() {
        let mut ports: PortMap = HashMap::new();
        ports.insert(
            "4096/tcp".to_string(),
            Some(vec![PortBinding {
                host_ip: Some(LOOPBACK.to_string()),
                host_port: Some("49153".to_string()),
            }]),
        );
        ports.insert("22/tcp".to_string(), None);

        assert_eq!(published_port(&ports, Some("4096/tcp")), Some(49153));
        assert_eq!(published_port(&ports, Some("22/tcp")), None);
        assert_eq!(published_port(&ports, None), Some(49153));
        assert_eq!(published_port(&HashMap::new(), None), None);
    }
}
