//! Configuration loading for sync-client.
//!
//! Configuration is loaded from a TOML file (default: `outbox.toml`).
//! Every section and field is optional; missing values use the defaults.

use outbox_sync_core::SchedulerConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for the sync engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,
    /// Adaptive scheduler tuning.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Exhausted-entry sweep configuration.
    #[serde(default)]
    pub sweep: SweepConfig,
    /// Queue storage configuration.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long `sync_now` waits for each acknowledgement (default: 5000ms).
    #[serde(default = "default_ack_timeout_ms")]
    pub ack_timeout_ms: u64,
    /// Retry ceiling for queue entries (default: 3).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pause between background-drain sends (default: 100ms).
    #[serde(default = "default_drain_delay_ms")]
    pub drain_delay_ms: u64,
}

/// Exhausted-entry sweep configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepConfig {
    /// Enable the sweep task (default: true).
    #[serde(default = "default_sweep_enabled")]
    pub enabled: bool,
    /// Sweep interval in seconds (default: 300).
    #[serde(default = "default_sweep_interval")]
    pub interval_secs: u64,
}

/// Queue storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Path to the SQLite queue database.
    #[serde(default = "default_database_path")]
    pub database: PathBuf,
}

// Default value functions
fn default_ack_timeout_ms() -> u64 {
    5_000
}

fn default_max_retries() -> u32 {
    3
}

fn default_drain_delay_ms() -> u64 {
    100
}

fn default_sweep_enabled() -> bool {
    true
}

fn default_sweep_interval() -> u64 {
    300 // 5 minutes
}

fn default_database_path() -> PathBuf {
    PathBuf::from("outbox.db")
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ack_timeout_ms: default_ack_timeout_ms(),
            max_retries: default_max_retries(),
            drain_delay_ms: default_drain_delay_ms(),
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            enabled: default_sweep_enabled(),
            interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
        }
    }
}

impl SessionConfig {
    /// Acknowledgement timeout as a Duration.
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Background-drain pause as a Duration.
    pub fn drain_delay(&self) -> Duration {
        Duration::from_millis(self.drain_delay_ms)
    }
}

impl SweepConfig {
    /// Sweep interval as a Duration (at least one second).
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl SyncConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            source: e,
        })
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Render)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
    /// Failed to render configuration.
    #[error("failed to render config: {0}")]
    Render(#[source] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = SyncConfig::default();
        assert_eq!(config.session.ack_timeout(), Duration::from_secs(5));
        assert_eq!(config.session.max_retries, 3);
        assert_eq!(config.scheduler.base_interval_ms, 5_000);
        assert!(config.sweep.enabled);
        assert_eq!(config.storage.database, PathBuf::from("outbox.db"));
    }

    #[test]
    fn empty_toml_equals_defaults() {
        let config = SyncConfig::from_toml_str("").unwrap();
        assert_eq!(config, SyncConfig::default());
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
[session]
ack_timeout_ms = 2500
max_retries = 5

[scheduler]
base_interval_ms = 1000
max_interval_ms = 120000

[sweep]
enabled = false

[storage]
database = "/data/outbox.db"
"#;

        let config = SyncConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.session.ack_timeout_ms, 2500);
        assert_eq!(config.session.max_retries, 5);
        assert_eq!(config.scheduler.base_interval_ms, 1000);
        assert_eq!(config.scheduler.max_interval_ms, 120_000);
        assert!(!config.sweep.enabled);
        assert_eq!(config.storage.database, PathBuf::from("/data/outbox.db"));
    }

    #[test]
    fn config_missing_fields_use_defaults() {
        let toml = r#"
[session]
max_retries = 7
[scheduler]
[sweep]
"#;

        let config = SyncConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.session.max_retries, 7);
        assert_eq!(config.session.drain_delay_ms, 100);
        assert_eq!(config.scheduler.idle_threshold_ms, 30_000);
        assert_eq!(config.sweep.interval_secs, 300);
    }

    #[test]
    fn rendered_config_parses_back() {
        let config = SyncConfig::default();
        let rendered = config.to_toml_string().unwrap();
        assert_eq!(SyncConfig::from_toml_str(&rendered).unwrap(), config);
    }

    #[test]
    fn load_reports_missing_file() {
        let result = SyncConfig::load(Path::new("/nonexistent/outbox.toml"));
        assert!(matches!(result, Err(ConfigError::ReadError { .. })));
    }

    #[test]
    fn invalid_toml_is_rejected() {
        let result = SyncConfig::from_toml_str("[session]\nmax_retries = \"lots\"");
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }
}
