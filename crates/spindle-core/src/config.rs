//! Runtime configuration.
//!
//! Sources, later wins:
//! 1. built-in defaults (concurrency 5, queues critical=6 default=3 low=1)
//! 2. JSON file named by `SPINDLE_CONFIG`
//! 3. environment: `REDIS_ADDR`, `REDIS_PASSWORD`, `SPINDLE_CONCURRENCY`, `SPINDLE_LOG`

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::app::{RetryPolicy, SchedulerConfig, ServerConfig};
use crate::domain::QueueWeights;
use crate::ports::ArchiveRetention;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Redis,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSection {
    pub backend: StoreBackend,
    pub redis_addr: String,
    pub redis_password: Option<String>,
    pub key_prefix: String,
    /// Archived tasks kept per queue.
    pub archive_max_tasks: usize,
    pub archive_max_age_days: u64,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_addr: "localhost:6380".to_string(),
            redis_password: None,
            key_prefix: "spindle".to_string(),
            archive_max_tasks: 10_000,
            archive_max_age_days: 90,
        }
    }
}

impl StoreSection {
    pub fn archive_retention(&self) -> ArchiveRetention {
        ArchiveRetention {
            max_tasks: self.archive_max_tasks,
            max_age: Duration::from_secs(self.archive_max_age_days.saturating_mul(24 * 60 * 60)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub concurrency: usize,
    pub queues: BTreeMap<String, u32>,
    pub strict_priority: bool,
    pub shutdown_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub lease_duration_ms: u64,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub store_retries: u32,
    pub promote_interval_ms: u64,
    pub reap_interval_ms: u64,
}

impl Default for ServerSection {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            concurrency: 5,
            queues: BTreeMap::from([
                ("critical".to_string(), 6),
                ("default".to_string(), 3),
                ("low".to_string(), 1),
            ]),
            strict_priority: false,
            shutdown_timeout_ms: 8_000,
            poll_interval_ms: 1_000,
            lease_duration_ms: 30_000,
            retry_base_ms: retry.base_delay.as_millis() as u64,
            retry_max_ms: retry.max_delay.as_millis() as u64,
            store_retries: 3,
            promote_interval_ms: 1_000,
            reap_interval_ms: 5_000,
        }
    }
}

impl ServerSection {
    pub fn to_server_config(&self) -> Result<ServerConfig, ConfigError> {
        let queues = QueueWeights::new(self.queues.iter().map(|(q, w)| (q.as_str(), *w)))
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        let config = ServerConfig {
            concurrency: self.concurrency,
            queues,
            strict_priority: self.strict_priority,
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            lease_duration: Duration::from_millis(self.lease_duration_ms),
            retry: RetryPolicy::new(
                Duration::from_millis(self.retry_base_ms),
                Duration::from_millis(self.retry_max_ms),
            ),
            store_retries: self.store_retries,
        };
        config
            .validate()
            .map_err(|e| ConfigError::Validation(e.to_string()))?;
        Ok(config)
    }

    pub fn promote_interval(&self) -> Duration {
        Duration::from_millis(self.promote_interval_ms)
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `spindle_core=debug,info`.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpindleConfig {
    pub store: StoreSection,
    pub server: ServerSection,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

impl SpindleConfig {
    /// Defaults, then `SPINDLE_CONFIG` file, then environment overrides; validated.
    pub fn load() -> Result<Self, ConfigError> {
        let mut cfg = match std::env::var("SPINDLE_CONFIG") {
            Ok(path) if !path.is_empty() => Self::from_file(path)?,
            _ => Self::default(),
        };
        cfg.apply_env_overrides(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let s = fs::read_to_string(path)?;
        Self::from_json(&s)
    }

    pub fn from_json(s: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply overrides read through `lookup` (the process environment in `load`).
    ///
    /// Setting `REDIS_ADDR` selects the Redis backend.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("REDIS_ADDR").filter(|v| !v.is_empty()) {
            self.store.redis_addr = addr;
            self.store.backend = StoreBackend::Redis;
        }
        if let Some(password) = lookup("REDIS_PASSWORD") {
            self.store.redis_password = Some(password).filter(|p| !p.is_empty());
        }
        if let Some(v) = lookup("SPINDLE_CONCURRENCY") {
            self.server.concurrency = v
                .parse()
                .map_err(|e| ConfigError::Parse(format!("invalid SPINDLE_CONCURRENCY: {e}")))?;
        }
        if let Some(v) = lookup("SPINDLE_LOG") {
            self.logging.level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.to_server_config()?;
        if self.server.promote_interval_ms == 0 || self.server.reap_interval_ms == 0 {
            return Err(ConfigError::Validation(
                "server.promote_interval_ms and server.reap_interval_ms must be > 0".into(),
            ));
        }
        if self.scheduler.tick_interval.is_zero() {
            return Err(ConfigError::Validation(
                "scheduler.tick_interval_ms must be > 0".into(),
            ));
        }
        if self.store.backend == StoreBackend::Redis && self.store.redis_addr.is_empty() {
            return Err(ConfigError::Validation("store.redis_addr must be set".into()));
        }
        Ok(())
    }
}
