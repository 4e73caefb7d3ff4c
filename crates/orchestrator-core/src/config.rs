//! Orchestrator configuration, loaded from `.orchestrator/config.toml` in the
//! project root with defaults for everything it omits.
//!
//! Grounded on krusty-core's `mcp::config::McpConfig::load` (read-if-present,
//! default otherwise, structured logging either way) adapted from JSON to
//! TOML since this config is authored by hand rather than by a client.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const CONFIG_RELATIVE_PATH: &str = ".orchestrator/config.toml";

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub shell: ShellConfig,
    pub event_bus: EventBusConfig,
    pub workflow: WorkflowConfig,
    #[serde(default)]
    pub hooks: Vec<HookConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            shell: ShellConfig::default(),
            event_bus: EventBusConfig::default(),
            workflow: WorkflowConfig::default(),
            hooks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file, relative to the project root
    /// unless absolute.
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: ".orchestrator/state.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    pub default_timeout_secs: u64,
    pub max_timeout_secs: u64,
    pub default_max_output_bytes: usize,
    pub max_output_bytes: usize,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 60,
            max_timeout_secs: 300,
            default_max_output_bytes: 4 * 1024,
            max_output_bytes: 64 * 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventBusConfig {
    /// Capacity of the broadcast channel backing the event bus. Subscribers
    /// that fall this far behind the newest event are dropped.
    pub capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Number of times a pulse may be sent back with `retry_pulse` before
    /// the workflow orchestrator gives up and marks it failed instead.
    pub pulse_rejection_cap: i64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self { pulse_rejection_cap: 3 }
    }
}

/// A post-write hook definition, same shape `PostWriteHookRunner` consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HookConfig {
    pub glob: String,
    pub command: String,
    #[serde(default)]
    pub on_failure: HookFailureMode,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookFailureMode {
    #[default]
    Warn,
    Block,
}

impl Config {
    /// Load config from `.orchestrator/config.toml` under `project_root`,
    /// falling back to defaults if the file does not exist.
    pub async fn load(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(CONFIG_RELATIVE_PATH);

        if !config_path.exists() {
            tracing::debug!("No config file found at {:?}, using defaults", config_path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(&config_path)
            .await
            .with_context(|| format!("Failed to read {:?}", config_path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {:?}", config_path))?;

        tracing::info!("Loaded orchestrator config from {:?}", config_path);

        Ok(config)
    }

    /// Resolve the configured database path against `project_root` if it is
    /// not already absolute.
    pub fn database_path(&self, project_root: &Path) -> std::path::PathBuf {
        let path = Path::new(&self.database.path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            project_root.join(path)
        }
    }

    pub fn into_hook_configs(self) -> Vec<HookConfig> {
        self.hooks
    }
}
