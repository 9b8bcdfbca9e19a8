//! Configuration model for muster.
//!
//! Defines the `CoreConfig` struct that represents `.muster/config.yaml`.
//! Supports forward-compatible YAML parsing (unknown fields are ignored),
//! sensible defaults for optional fields, and validation of config values.
//!
//! Configuration is loaded once at startup and treated as read-only
//! thereafter; reload is an explicit operator action, never implicit.

use crate::error::{MusterError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for the muster core.
///
/// Represents the contents of `.muster/config.yaml`. Unknown fields in the
/// YAML are ignored for forward compatibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    // =========================================================================
    // Orchestration
    // =========================================================================
    /// Maximum concurrently running tasks (bounded worker pool size).
    pub max_parallel: usize,

    /// Default per-task execution timeout in seconds.
    pub task_timeout_seconds: u64,

    /// Grace period before a cancelled task is hard-killed, in milliseconds.
    pub cancel_grace_ms: u64,

    /// Completed execution records retained for auditing after the caller
    /// has not yet collected them.
    pub retention_completed: usize,

    // =========================================================================
    // Discovery and cache
    // =========================================================================
    /// TTL for cached definitions and discovery results, in seconds.
    pub cache_ttl_seconds: u64,

    /// Approximate byte budget for the cache; puts past the budget evict
    /// oldest entries first.
    pub cache_budget_bytes: usize,

    /// Interval of the background cache sweep, in seconds.
    pub cache_sweep_seconds: u64,

    /// Definitions scoring below this are flagged low-confidence in query
    /// results. They are never excluded from exact-name lookup.
    pub min_validation_score: u8,

    /// Optional system-tier agents directory. When unset, the
    /// `MUSTER_SYSTEM_AGENTS` environment variable is consulted.
    pub system_agents_dir: Option<PathBuf>,

    /// Optional user-tier agents directory override (defaults to the
    /// platform config directory).
    pub user_agents_dir: Option<PathBuf>,

    // =========================================================================
    // Modification watcher
    // =========================================================================
    /// Debounce window for filesystem change batches, in milliseconds.
    pub watch_debounce_ms: u64,

    /// Number of timestamped backups retained per agent.
    pub backup_keep_count: usize,

    /// Maximum age of retained backups, in days.
    pub backup_keep_days: u32,

    // =========================================================================
    // Isolation
    // =========================================================================
    /// Bounded retries for isolation acquisition before the task fails.
    pub isolation_retries: u32,

    /// Backoff between isolation retries, in milliseconds.
    pub isolation_backoff_ms: u64,

    // =========================================================================
    // Knowledge store
    // =========================================================================
    /// Timeout for knowledge-store lookups, in milliseconds.
    pub knowledge_timeout_ms: u64,

    /// Maximum knowledge records included in a context bundle.
    pub knowledge_record_limit: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_parallel: 5,
            task_timeout_seconds: 600,
            cancel_grace_ms: 2000,
            retention_completed: 100,
            cache_ttl_seconds: 300,
            cache_budget_bytes: 8 * 1024 * 1024,
            cache_sweep_seconds: 60,
            min_validation_score: 50,
            system_agents_dir: None,
            user_agents_dir: None,
            watch_debounce_ms: 40,
            backup_keep_count: 10,
            backup_keep_days: 30,
            isolation_retries: 3,
            isolation_backoff_ms: 250,
            knowledge_timeout_ms: 2000,
            knowledge_record_limit: 10,
        }
    }
}

impl CoreConfig {
    /// Load config from a YAML file.
    ///
    /// Returns the defaults if the file does not exist.
    /// Returns `Err` if the file exists but cannot be parsed or is invalid.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            MusterError::Config(format!(
                "failed to read config '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: CoreConfig = serde_yaml::from_str(yaml)
            .map_err(|e| MusterError::Config(format!("failed to parse config.yaml: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate config values.
    pub fn validate(&self) -> Result<()> {
        if self.max_parallel == 0 {
            return Err(MusterError::Config(
                "config validation failed: max_parallel must be greater than 0".to_string(),
            ));
        }

        if self.task_timeout_seconds == 0 {
            return Err(MusterError::Config(
                "config validation failed: task_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.cache_ttl_seconds == 0 {
            return Err(MusterError::Config(
                "config validation failed: cache_ttl_seconds must be greater than 0".to_string(),
            ));
        }

        if self.min_validation_score > 100 {
            return Err(MusterError::Config(
                "config validation failed: min_validation_score must be 0-100".to_string(),
            ));
        }

        if self.knowledge_record_limit == 0 {
            return Err(MusterError::Config(
                "config validation failed: knowledge_record_limit must be greater than 0"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Cache TTL as a `Duration`.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds)
    }

    /// Cache sweep interval as a `Duration`.
    pub fn cache_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.cache_sweep_seconds)
    }

    /// Default task timeout as a `Duration`.
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_seconds)
    }

    /// Cancellation grace period as a `Duration`.
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }

    /// Watcher debounce window as a `Duration`.
    pub fn watch_debounce(&self) -> Duration {
        Duration::from_millis(self.watch_debounce_ms)
    }

    /// Isolation retry backoff as a `Duration`.
    pub fn isolation_backoff(&self) -> Duration {
        Duration::from_millis(self.isolation_backoff_ms)
    }

    /// Knowledge lookup timeout as a `Duration`.
    pub fn knowledge_timeout(&self) -> Duration {
        Duration::from_millis(self.knowledge_timeout_ms)
    }
}
