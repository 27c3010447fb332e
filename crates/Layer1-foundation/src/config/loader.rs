//! Configuration Loader
//!
//! ## Search priority
//!
//! 1. User-level: `~/.agentbox/config.toml`
//! 2. Project-level: `.agentbox/config.toml`
//! 3. Explicit file passed by the caller
//! 4. `AGENTBOX_*` environment variables
//!
//! Each level overrides the previous one key by key.

use super::types::AgentboxConfig;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Config directory name
pub const CONFIG_DIR_NAME: &str = ".agentbox";

/// Config file name inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

// ============================================================================
// ConfigLoader
// ============================================================================

/// Layered config loader
pub struct ConfigLoader {
    /// Search paths, lowest priority first
    search_paths: Vec<ConfigPath>,
    /// Whether `AGENTBOX_*` variables are applied on top
    use_env: bool,
}

/// Config file location
#[derive(Debug, Clone)]
struct ConfigPath {
    path: PathBuf,
    priority: u8,
    description: &'static str,
    /// Missing file is an error rather than skipped
    required: bool,
}

impl ConfigLoader {
    /// Default search paths relative to `working_dir`
    pub fn new(working_dir: &Path) -> Self {
        let mut paths = Vec::new();

        if let Some(home) = dirs::home_dir() {
            paths.push(ConfigPath {
                path: home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME),
                priority: 10,
                description: "User config",
                required: false,
            });
        }

        paths.push(ConfigPath {
            path: working_dir.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME),
            priority: 20,
            description: "Project config",
            required: false,
        });

        Self {
            search_paths: paths,
            use_env: true,
        }
    }

    /// Loader over custom paths only, no environment overrides
    pub fn with_paths(paths: Vec<PathBuf>) -> Self {
        let search_paths = paths
            .into_iter()
            .enumerate()
            .map(|(i, path)| ConfigPath {
                path,
                priority: i as u8,
                description: "Custom",
                required: false,
            })
            .collect();

        Self {
            search_paths,
            use_env: false,
        }
    }

    /// Add an explicit file; it must exist
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(ConfigPath {
            path: path.into(),
            priority: u8::MAX,
            description: "Explicit config",
            required: true,
        });
        self.search_paths.sort_by_key(|p| p.priority);
        self
    }

    /// Toggle `AGENTBOX_*` overrides
    pub fn with_env(mut self, use_env: bool) -> Self {
        self.use_env = use_env;
        self
    }

    /// Load, merge and validate
    pub fn load(&self) -> Result<AgentboxConfig> {
        let mut merged = toml::Value::Table(toml::map::Map::new());

        for config_path in &self.search_paths {
            if !config_path.path.exists() {
                if config_path.required {
                    return Err(Error::Config(format!(
                        "config file not found: {}",
                        config_path.path.display()
                    )));
                }
                continue;
            }

            let value = read_toml(&config_path.path)?;
            info!(
                "Loaded {} from: {}",
                config_path.description,
                config_path.path.display()
            );
            merge_values(&mut merged, value);
        }

        let mut config: AgentboxConfig = merged
            .try_into()
            .map_err(|e: toml::de::Error| Error::Config(e.to_string()))?;

        if self.use_env {
            apply_env_overrides(&mut config, std::env::vars())?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Existing config files, in priority order
    pub fn existing_files(&self) -> Vec<PathBuf> {
        self.search_paths
            .iter()
            .filter(|p| p.path.exists())
            .map(|p| p.path.clone())
            .collect()
    }
}

// ============================================================================
// Utilities
// ============================================================================

fn read_toml(path: &Path) -> Result<toml::Value> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("invalid config at {}: {}", path.display(), e)))
}

/// Deep-merge `later` into `base`; tables merge, everything else is replaced
fn merge_values(base: &mut toml::Value, later: toml::Value) {
    match (base, later) {
        (toml::Value::Table(base), toml::Value::Table(later)) => {
            for (key, value) in later {
                match base.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, later) => *base = later,
    }
}

/// Apply `AGENTBOX_*` overrides from an iterator of `(key, value)` pairs
pub fn apply_env_overrides<I>(config: &mut AgentboxConfig, vars: I) -> Result<()>
where
    I: IntoIterator<Item = (String, String)>,
{
    for (key, value) in vars {
        match key.as_str() {
            "AGENTBOX_IMAGE" => config.container.image = value,
            "AGENTBOX_MAX_CONCURRENT_TASKS" => {
                config.tasks.max_concurrent_tasks = parse_env(&key, &value)?
            }
            "AGENTBOX_TASK_TIMEOUT_SECS" => {
                config.tasks.task_timeout_secs = parse_env(&key, &value)?
            }
            "AGENTBOX_HEALTH_CHECK_RETRIES" => {
                config.tasks.health_check_retries = parse_env(&key, &value)?
            }
            "AGENTBOX_HEALTH_CHECK_INTERVAL_MS" => {
                config.tasks.health_check_interval_ms = parse_env(&key, &value)?
            }
            _ => continue,
        }
        debug!("Applied env override {}", key);
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} has an invalid value: {:?}", key, value)))
}
