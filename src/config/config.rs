//! TOML configuration parsing and management.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::coordinator::RetryConfig;
use crate::registry::RegistryConfig;
use crate::routing::IterationBudget;

/// Listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,
    /// Bind port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8765
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Workflow execution limits and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Maximum total agent invocations per workflow.
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    /// Maximum invocations of any single agent per workflow.
    #[serde(default = "default_max_agent_visits")]
    pub max_agent_visits: usize,
    /// Attempts per agent invocation, including the first.
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    /// Base backoff between retries, in milliseconds.
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    /// How long terminal workflows stay fetchable, in seconds.
    #[serde(default = "default_retention_secs")]
    pub retention_secs: u64,
    /// Per-workflow event channel capacity.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_max_steps() -> usize {
    24
}

fn default_max_agent_visits() -> usize {
    4
}

fn default_retry_max_attempts() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_retention_secs() -> u64 {
    300
}

fn default_event_capacity() -> usize {
    256
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_agent_visits: default_max_agent_visits(),
            retry_max_attempts: default_retry_max_attempts(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retention_secs: default_retention_secs(),
            event_capacity: default_event_capacity(),
        }
    }
}

impl WorkflowConfig {
    /// The routing iteration budget these settings describe.
    pub fn budget(&self) -> IterationBudget {
        IterationBudget {
            max_steps: self.max_steps,
            max_agent_visits: self.max_agent_visits,
        }
    }

    /// The coordinator retry policy these settings describe.
    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Directory for per-workflow markdown transcripts; unset disables
    /// them.
    #[serde(default)]
    pub transcript_dir: Option<String>,
}

/// Text-generation provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Chat-completions endpoint URL.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Model name sent with each request.
    #[serde(default = "default_model")]
    pub model: String,
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8080/v1/chat/completions".to_string()
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
        }
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Configuration {
    /// Listener settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// Workflow limits and retention.
    #[serde(default)]
    pub workflow: WorkflowConfig,
    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Provider settings.
    #[serde(default)]
    pub generation: GenerationConfig,
}

impl Configuration {
    /// The registry configuration these settings describe.
    pub fn registry(&self) -> RegistryConfig {
        RegistryConfig {
            retry: self.workflow.retry(),
            retention: Duration::from_secs(self.workflow.retention_secs),
            event_capacity: self.workflow.event_capacity,
            transcript_dir: self.logging.transcript_dir.as_ref().map(PathBuf::from),
        }
    }
}

/// Loads [`Configuration`] from a TOML file.
#[derive(Debug, Clone)]
pub struct ConfigurationLoader {
    /// The loaded configuration.
    pub config: Configuration,
    /// Path the configuration was read from, if any.
    pub config_path: Option<PathBuf>,
}

impl ConfigurationLoader {
    /// Load configuration.
    ///
    /// # Arguments
    /// * `config_path` - Path to a TOML file. If `None`, `troupe.toml` in
    ///   the working directory is used when present, otherwise defaults.
    pub fn new(config_path: Option<&Path>) -> Result<Self> {
        let candidate = match config_path {
            Some(path) => Some(path.to_path_buf()),
            None => {
                let default = PathBuf::from("troupe.toml");
                default.exists().then_some(default)
            }
        };

        match candidate {
            Some(path) => {
                let raw = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read config file: {}", path.display()))?;
                let config: Configuration = toml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
                Ok(Self {
                    config,
                    config_path: Some(path),
                })
            }
            None => Ok(Self {
                config: Configuration::default(),
                config_path: None,
            }),
        }
    }
}
