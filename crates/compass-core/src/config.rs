//! Configuration management for Compass
//!
//! Settings live in `compass.toml`. Every section has defaults, so an empty
//! or missing file yields a working configuration. Secrets are never stored in
//! the file; `security.encryption_key_env` names the environment variable
//! holding the credential passphrase.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{CompassError, Result};

pub const CONFIG_FILE: &str = "compass.toml";

/// Top-level Compass configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompassConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub evaluation: EvaluationConfig,

    #[serde(default)]
    pub drivers: DriversConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

/// Storage location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

/// How a group evaluation reacts to a failing metric
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// First failure aborts the whole group; nothing is recorded
    #[default]
    FailFast,
    /// Every metric runs; successes are recorded, failures reported alongside
    BestEffort,
}

/// What happens to a REACHED metric whose condition stops holding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionPolicy {
    /// REACHED is terminal
    #[default]
    Latching,
    /// REACHED falls back to ACTIVE
    Tracking,
}

/// Group evaluation parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Maximum metrics queried at once within one group
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Per-metric driver timeout
    #[serde(default = "default_metric_timeout_ms")]
    pub metric_timeout_ms: u64,

    /// Overall deadline for one group evaluation
    #[serde(default)]
    pub group_deadline_ms: Option<u64>,

    /// Scheduler tick
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default)]
    pub failure_policy: FailurePolicy,

    #[serde(default)]
    pub transition_policy: TransitionPolicy,
}

/// Driver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriversConfig {
    /// HTTP timeout used by network drivers
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Credential sealing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Environment variable containing the encryption passphrase
    #[serde(default = "default_encryption_key_env")]
    pub encryption_key_env: String,
}

// Default value providers
fn default_database_path() -> PathBuf {
    PathBuf::from(".compass/compass.db")
}

fn default_max_concurrency() -> usize {
    4
}

fn default_metric_timeout_ms() -> u64 {
    10_000
}

fn default_interval_secs() -> u64 {
    60
}

fn default_request_timeout_ms() -> u64 {
    5_000
}

fn default_encryption_key_env() -> String {
    "ENCRYPTION_KEY".to_string()
}

impl CompassConfig {
    /// Load configuration from `path` or use defaults when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)
                .map_err(|e| CompassError::Config(format!("Failed to parse config file: {}", e)))?;
            config.evaluation.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Write the default configuration to `path`
    pub fn write_default(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| CompassError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Read the credential passphrase from the configured environment variable
    pub fn encryption_key(&self) -> Result<String> {
        let var = &self.security.encryption_key_env;
        match std::env::var(var) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Err(CompassError::Config(format!(
                "Environment variable {} is not set",
                var
            ))),
        }
    }
}

impl EvaluationConfig {
    pub fn metric_timeout(&self) -> Duration {
        Duration::from_millis(self.metric_timeout_ms)
    }

    pub fn group_deadline(&self) -> Option<Duration> {
        self.group_deadline_ms.map(Duration::from_millis)
    }

    /// Scheduler tick, never shorter than one second
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval_secs == 0 {
            return Err(CompassError::Config(
                "evaluation.interval_secs must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(CompassError::Config(
                "evaluation.max_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl DriversConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            metric_timeout_ms: default_metric_timeout_ms(),
            group_deadline_ms: None,
            interval_secs: default_interval_secs(),
            failure_policy: FailurePolicy::default(),
            transition_policy: TransitionPolicy::default(),
        }
    }
}

impl Default for DriversConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            encryption_key_env: default_encryption_key_env(),
        }
    }
}
