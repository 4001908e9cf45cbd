//! Configuration structures for Pinpool
//!
//! Configurations are loaded from YAML files and can be overridden by
//! environment variables. Every field has a default, so an empty file (or no
//! file at all) yields the stock three-worker simulation.

use crate::error::{PinpoolError, Result};
use crate::message::ClientId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PinpoolConfig {
    /// Worker pool configuration
    #[serde(default)]
    pub pool: PoolConfig,

    /// Message handler configuration
    #[serde(default)]
    pub handler: HandlerConfig,

    /// Incoming message source configuration
    #[serde(default)]
    pub source: SourceConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of workers (and dedicated queues)
    #[serde(default = "default_pool_size")]
    pub size: usize,

    /// How long workers may drain their queues once shutdown starts
    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
}

/// Message handler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerConfig {
    /// Which handler to run
    #[serde(default)]
    pub kind: HandlerKind,

    /// Simulated processing time per message in milliseconds
    #[serde(default = "default_handler_duration_ms")]
    pub duration_ms: u64,

    /// Clients whose messages the handler rejects
    #[serde(default)]
    pub fail_client_ids: Vec<ClientId>,
}

/// Handler implementation selector
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    /// Sleep for `duration_ms`, logging start and end
    #[default]
    Simulated,

    /// Log the message and return immediately
    Logging,
}

impl std::fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerKind::Simulated => write!(f, "simulated"),
            HandlerKind::Logging => write!(f, "logging"),
        }
    }
}

/// Incoming message source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Client ids replayed once at startup, one message each
    #[serde(default = "default_client_ids")]
    pub client_ids: Vec<ClientId>,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Dump Prometheus metrics at shutdown
    #[serde(default = "default_metrics")]
    pub enable_metrics: bool,
}

/// Default value functions
fn default_pool_size() -> usize {
    3
}

fn default_shutdown_timeout_ms() -> u64 {
    10_000
}

fn default_handler_duration_ms() -> u64 {
    1_000
}

fn default_client_ids() -> Vec<ClientId> {
    vec![1, 2, 3, 1, 5, 4, 3, 7, 8, 1, 3, 5]
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics() -> bool {
    true
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: default_pool_size(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
        }
    }
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            kind: HandlerKind::default(),
            duration_ms: default_handler_duration_ms(),
            fail_client_ids: Vec::new(),
        }
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            client_ids: default_client_ids(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            enable_metrics: default_metrics(),
        }
    }
}

impl PinpoolConfig {
    /// Load configuration from a YAML file
    pub fn from_file<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path).map_err(|e| {
            PinpoolError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: PinpoolConfig = serde_yaml::from_str(&content)?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables over the defaults
    pub fn from_env() -> Result<Self> {
        let mut config = PinpoolConfig::default();

        if let Some(size) = env_parse("PINPOOL_POOL_SIZE")? {
            config.pool.size = size;
        }
        if let Some(timeout) = env_parse("PINPOOL_SHUTDOWN_TIMEOUT_MS")? {
            config.pool.shutdown_timeout_ms = timeout;
        }
        if let Some(duration) = env_parse("PINPOOL_HANDLER_DURATION_MS")? {
            config.handler.duration_ms = duration;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.pool.size == 0 {
            return Err(PinpoolError::config("Pool size must be positive"));
        }

        match self.observability.log_level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(PinpoolError::config(format!("Invalid log level: {}", other)));
            }
        }

        Ok(())
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.pool.shutdown_timeout_ms)
    }
}

impl HandlerConfig {
    /// Simulated processing time per message
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.duration_ms)
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map(Some)
            .map_err(|_| PinpoolError::Config(format!("Invalid value for {}: {}", key, value))),
        Err(_) => Ok(None),
    }
}
