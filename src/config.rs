//! Application configuration
//!
//! Loaded from a TOML file; every section and field is optional and falls
//! back to its default.
//!
//! ```toml
//! shutdown_timeout_secs = 30
//!
//! [database]
//! url = "sqlite://./parking.db?mode=rwc"
//!
//! [logging]
//! level = "info"
//! format = "pretty"   # or "json"
//!
//! [metrics]
//! enabled = false
//! listen_addr = "0.0.0.0:9464"
//!
//! [reconciler]
//! late_threshold_minutes = 15
//! period_secs = 60
//! stop_timeout_secs = 5
//! transition_max_attempts = 3
//! retry_initial_delay_ms = 200
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::application::lifecycle::{SchedulerConfig, DEFAULT_LATE_THRESHOLD_MINUTES};
use crate::infrastructure::DatabaseConfig;
use crate::shared::types::ConfigError;
use crate::shared::utills::RetryConfig;

const APP_DIR: &str = "parking-reservations";

/// Default location: `<config dir>/parking-reservations/config.toml`
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.toml")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseSection,
    pub logging: LoggingSection,
    pub metrics: MetricsSection,
    pub reconciler: ReconcilerSection,
    /// Upper bound for the whole process shutdown
    pub shutdown_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseSection::default(),
            logging: LoggingSection::default(),
            metrics: MetricsSection::default(),
            reconciler: ReconcilerSection::default(),
            shutdown_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseSection {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        let defaults = DatabaseConfig::default();
        Self {
            url: defaults.url,
            max_connections: defaults.max_connections,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Prometheus scrape endpoint for the scheduler counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    pub enabled: bool,
    pub listen_addr: String,
}

impl Default for MetricsSection {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "0.0.0.0:9464".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerSection {
    pub late_threshold_minutes: i64,
    pub period_secs: u64,
    pub stop_timeout_secs: u64,
    pub transition_max_attempts: u32,
    pub retry_initial_delay_ms: u64,
}

impl Default for ReconcilerSection {
    fn default() -> Self {
        Self {
            late_threshold_minutes: DEFAULT_LATE_THRESHOLD_MINUTES,
            period_secs: 60,
            stop_timeout_secs: 5,
            transition_max_attempts: 3,
            retry_initial_delay_ms: 200,
        }
    }
}

impl AppConfig {
    /// Read and validate a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config = Self::from_toml(&raw).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                source,
            },
            other => other,
        })?;
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: "<inline>".to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Invalid("database.url is empty".to_string()));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "database.max_connections must be at least 1".to_string(),
            ));
        }
        if !matches!(self.logging.format.to_lowercase().as_str(), "pretty" | "json") {
            return Err(ConfigError::Invalid(format!(
                "logging.format must be 'pretty' or 'json', got '{}'",
                self.logging.format
            )));
        }
        if self.metrics.enabled && self.metrics.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::Invalid(format!(
                "metrics.listen_addr '{}' is not a socket address",
                self.metrics.listen_addr
            )));
        }
        let r = &self.reconciler;
        if r.late_threshold_minutes < 0 {
            return Err(ConfigError::Invalid(
                "reconciler.late_threshold_minutes must not be negative".to_string(),
            ));
        }
        if r.period_secs == 0 {
            return Err(ConfigError::Invalid(
                "reconciler.period_secs must be at least 1".to_string(),
            ));
        }
        if r.transition_max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "reconciler.transition_max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn database_config(&self) -> DatabaseConfig {
        DatabaseConfig {
            url: self.database.url.clone(),
            max_connections: self.database.max_connections,
        }
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            period: Duration::from_secs(self.reconciler.period_secs),
            stop_timeout: Duration::from_secs(self.reconciler.stop_timeout_secs),
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.reconciler.transition_max_attempts,
            Duration::from_millis(self.reconciler.retry_initial_delay_ms),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.reconciler.late_threshold_minutes, 15);
        assert_eq!(config.scheduler_config().period, Duration::from_secs(60));
        assert_eq!(config.scheduler_config().stop_timeout, Duration::from_secs(5));
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [reconciler]
            late_threshold_minutes = 20

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.reconciler.late_threshold_minutes, 20);
        assert_eq!(config.reconciler.period_secs, 60);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.database, DatabaseSection::default());
    }

    #[test]
    fn retry_config_follows_reconciler_section() {
        let config = AppConfig::from_toml(
            r#"
            [reconciler]
            transition_max_attempts = 5
            retry_initial_delay_ms = 50
            "#,
        )
        .unwrap();
        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, 5);
        assert_eq!(retry.initial_delay, Duration::from_millis(50));
    }

    #[test]
    fn rejects_bad_values() {
        let zero_period = AppConfig::from_toml("[reconciler]\nperiod_secs = 0\n");
        assert!(matches!(zero_period, Err(ConfigError::Invalid(_))));

        let bad_format = AppConfig::from_toml("[logging]\nformat = \"xml\"\n");
        assert!(matches!(bad_format, Err(ConfigError::Invalid(_))));

        let negative = AppConfig::from_toml("[reconciler]\nlate_threshold_minutes = -1\n");
        assert!(matches!(negative, Err(ConfigError::Invalid(_))));

        let bad_listener =
            AppConfig::from_toml("[metrics]\nenabled = true\nlisten_addr = \"nowhere\"\n");
        assert!(matches!(bad_listener, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        let result = AppConfig::from_toml("[reconciler\nperiod_secs = 1");
        assert!(matches!(result, Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = AppConfig::load(Path::new("/nonexistent/parking/config.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn default_path_ends_with_app_dir() {
        let path = default_config_path();
        assert!(path.ends_with("parking-reservations/config.toml"));
    }
}
