//! Configuration module
//!
//! Handles loading and validating agent configuration from TOML files.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for the Clogs Agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Monitoring backend connection settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Agent identity and heartbeat settings
    #[serde(default)]
    pub agent: AgentConfig,

    /// Container discovery settings
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Log pipeline tuning
    #[serde(default)]
    pub logs: LogsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Monitoring backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the backend API
    #[serde(default = "default_backend_url")]
    pub url: String,

    /// API key sent as `X-API-Key`
    #[serde(default)]
    pub api_key: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Attempts at validating or registering the agent identity
    #[serde(default = "default_identity_retry_attempts")]
    pub identity_retry_attempts: u32,

    /// Pause between identity attempts in milliseconds
    #[serde(default = "default_identity_retry_delay")]
    pub identity_retry_delay_ms: u64,
}

/// Agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// File holding the persisted agent id
    #[serde(default = "default_identity_file")]
    pub identity_file: PathBuf,

    /// Heartbeat interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,
}

/// Discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    /// Discovery cycle interval in seconds
    #[serde(default = "default_discovery_interval")]
    pub interval_secs: u64,

    /// Tag probed for when no explicit filter is configured
    #[serde(default = "default_monitoring_tag")]
    pub monitoring_tag: String,

    /// Explicit `key=value` predicates; an empty list monitors everything
    #[serde(default)]
    pub tag_filter: Option<Vec<String>>,

    /// Monitor every grouping regardless of where the agent runs
    #[serde(default)]
    pub cross_boundary: bool,

    /// Docker socket path (defaults to the platform socket)
    #[serde(default)]
    pub docker_socket: Option<String>,
}

/// Log pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogsConfig {
    /// Records per upload
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Longest a non-empty batch waits before flushing
    #[serde(default = "default_flush_interval")]
    pub flush_interval_ms: u64,

    /// Pause after a failed upload
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Records retained while the backend is unreachable
    #[serde(default = "default_max_buffered")]
    pub max_buffered: usize,

    /// Capacity of the queue between streaming tasks and the sender
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Longest the sender blocks on an empty queue
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_ms: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout() -> u64 {
    10
}

fn default_identity_retry_attempts() -> u32 {
    5
}

fn default_identity_retry_delay() -> u64 {
    2000
}

fn default_identity_file() -> PathBuf {
    PathBuf::from(".clogs/agent/id")
}

fn default_heartbeat_interval() -> u64 {
    5
}

fn default_discovery_interval() -> u64 {
    1
}

fn default_monitoring_tag() -> String {
    "clogs.monitoring.enabled=true".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_interval() -> u64 {
    5000
}

fn default_retry_delay() -> u64 {
    2000
}

fn default_max_buffered() -> usize {
    1000
}

fn default_queue_capacity() -> usize {
    10_000
}

fn default_receive_timeout() -> u64 {
    1000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
            api_key: None,
            request_timeout_secs: default_request_timeout(),
            identity_retry_attempts: default_identity_retry_attempts(),
            identity_retry_delay_ms: default_identity_retry_delay(),
        }
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            identity_file: default_identity_file(),
            heartbeat_interval_secs: default_heartbeat_interval(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_discovery_interval(),
            monitoring_tag: default_monitoring_tag(),
            tag_filter: None,
            cross_boundary: false,
            docker_socket: None,
        }
    }
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval(),
            retry_delay_ms: default_retry_delay(),
            max_buffered: default_max_buffered(),
            queue_capacity: default_queue_capacity(),
            receive_timeout_ms: default_receive_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl AgentConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

impl DiscoveryConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl BackendConfig {
    pub fn identity_retry_delay(&self) -> Duration {
        Duration::from_millis(self.identity_retry_delay_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file. A missing file yields defaults.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    /// Reject settings the services cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.backend.url.is_empty() {
            bail!("backend.url must not be empty");
        }
        if self.backend.request_timeout_secs == 0 {
            bail!("backend.request_timeout_secs must be greater than zero");
        }
        if self.backend.identity_retry_attempts == 0 {
            bail!("backend.identity_retry_attempts must be greater than zero");
        }
        if self.agent.heartbeat_interval_secs == 0 {
            bail!("agent.heartbeat_interval_secs must be greater than zero");
        }
        if self.discovery.interval_secs == 0 {
            bail!("discovery.interval_secs must be greater than zero");
        }

        let logs = &self.logs;
        if logs.batch_size == 0 {
            bail!("logs.batch_size must be greater than zero");
        }
        if logs.flush_interval_ms == 0 || logs.receive_timeout_ms == 0 {
            bail!("logs.flush_interval_ms and logs.receive_timeout_ms must be greater than zero");
        }
        if logs.queue_capacity == 0 {
            bail!("logs.queue_capacity must be greater than zero");
        }
        if logs.max_buffered < logs.batch_size {
            bail!(
                "logs.max_buffered ({}) must be at least logs.batch_size ({})",
                logs.max_buffered,
                logs.batch_size
            );
        }

        Ok(())
    }
}
