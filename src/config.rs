//! # Configuration
//!
//! Layered settings, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. TOML file: `$DECISION_JOBS_CONFIG_PATH`, else `config/decision-jobs.toml` if present
//! 3. environment variables `DECISION_JOBS__{SECTION}__{KEY}` (e.g. `DECISION_JOBS__DISPATCHER__WORKERS=8`)
//! 4. `DATABASE_URL`
//!
//! A `.env` file in the working directory is loaded first when present.

use crate::backend::BackendClientConfig;
use crate::constants::DEFAULT_LEASE_SECONDS;
use crate::handlers::RetentionPolicy;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "config/decision-jobs.toml";
pub const CONFIG_PATH_ENV: &str = "DECISION_JOBS_CONFIG_PATH";
pub const ENV_PREFIX: &str = "DECISION_JOBS";

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Failed to load configuration: {message}")]
    LoadFailed { message: String },

    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    #[error("Missing required configuration field '{field}' in {context}")]
    MissingRequiredField { field: String, context: String },

    #[error("Invalid value for '{field}': '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

impl ConfigurationError {
    pub fn load_failed(message: impl ToString) -> Self {
        Self::LoadFailed {
            message: message.to_string(),
        }
    }

    pub fn missing_required_field(field: impl Into<String>, context: impl Into<String>) -> Self {
        Self::MissingRequiredField {
            field: field.into(),
            context: context.into(),
        }
    }

    pub fn invalid_value(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(err: config::ConfigError) -> Self {
        Self::load_failed(err)
    }
}

pub type ConfigResult<T> = Result<T, ConfigurationError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost/decision_jobs_development".to_string(),
            max_connections: 10,
            acquire_timeout_seconds: 5,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub workers: usize,
    pub poll_interval_ms: u64,
    pub lease_seconds: u64,
    /// Prefix for worker ids
    pub service_id: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            poll_interval_ms: 500,
            lease_seconds: DEFAULT_LEASE_SECONDS,
            service_id: "decision-jobs".to_string(),
        }
    }
}

impl DispatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_seconds)
    }

    /// How often a running handler's lease is extended
    pub fn lease_renewal(&self) -> Duration {
        self.lease() / 3
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub bind_address: String,
    pub request_timeout_ms: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_ms: 30_000,
        }
    }
}

impl WebConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub enabled: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub dispatcher: DispatcherConfig,
    pub backend: BackendClientConfig,
    pub web: WebConfig,
    pub scheduler: SchedulerConfig,
    pub retention: RetentionPolicy,
}

impl AppConfig {
    /// Load from every layer and validate
    pub fn load() -> ConfigResult<Self> {
        // a missing .env is normal
        let _ = dotenvy::dotenv();

        let (path, required) = match std::env::var(CONFIG_PATH_ENV) {
            Ok(path) => (PathBuf::from(path), true),
            Err(_) => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };
        if required && !path.exists() {
            return Err(ConfigurationError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let mut config: AppConfig = Config::builder()
            .add_source(File::from(path.as_path()).format(FileFormat::Toml).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database.url = url;
        }

        config.validate()?;
        debug!(
            config_path = %path.display(),
            workers = config.dispatcher.workers,
            backend = %config.backend.base_url,
            bind_address = %config.web.bind_address,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Defaults overlaid with a single TOML file, no environment
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let config: AppConfig = Config::builder()
            .add_source(File::from(path).format(FileFormat::Toml).required(true))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.url.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "database.url",
                "database configuration",
            ));
        }
        if !self.database.url.starts_with("postgres://")
            && !self.database.url.starts_with("postgresql://")
        {
            return Err(ConfigurationError::invalid_value(
                "database.url",
                &self.database.url,
                "expected a postgres:// or postgresql:// URL",
            ));
        }
        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                0,
                "pool size must be greater than 0",
            ));
        }

        if self.dispatcher.workers == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatcher.workers",
                0,
                "at least one worker is required",
            ));
        }
        if self.dispatcher.poll_interval_ms == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatcher.poll_interval_ms",
                0,
                "poll interval must be greater than 0",
            ));
        }
        if self.dispatcher.lease_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "dispatcher.lease_seconds",
                0,
                "lease must be greater than 0",
            ));
        }

        if let Err(e) = reqwest::Url::parse(&self.backend.base_url) {
            return Err(ConfigurationError::invalid_value(
                "backend.base_url",
                &self.backend.base_url,
                e.to_string(),
            ));
        }
        if self.backend.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "backend.max_attempts",
                0,
                "at least one attempt is required",
            ));
        }
        if self.backend.backoff_factor < 1.0 {
            return Err(ConfigurationError::invalid_value(
                "backend.backoff_factor",
                self.backend.backoff_factor,
                "backoff factor must be at least 1.0",
            ));
        }

        if self.web.bind_address.parse::<SocketAddr>().is_err() {
            return Err(ConfigurationError::invalid_value(
                "web.bind_address",
                &self.web.bind_address,
                "expected host:port",
            ));
        }

        for (field, days) in [
            ("retention.job_log_days", self.retention.job_log_days),
            ("retention.result_days", self.retention.result_days),
            ("retention.dead_days", self.retention.dead_days),
        ] {
            if days < 0 {
                return Err(ConfigurationError::invalid_value(
                    field,
                    days,
                    "retention must not be negative",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_toml(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.dispatcher.workers, 4);
        assert_eq!(config.backend.max_attempts, 3);
        assert_eq!(config.retention.result_days, 7);
        assert!(config.scheduler.enabled);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let file = write_toml(
            r#"
[dispatcher]
workers = 8
poll_interval_ms = 250

[backend]
base_url = "http://backend:8000/api/v1"
timeout_ms = 10000

[retention]
dead_days = 14
"#,
        );

        let config = AppConfig::from_file(file.path()).unwrap();
        assert_eq!(config.dispatcher.workers, 8);
        assert_eq!(config.dispatcher.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.dispatcher.lease_seconds, DEFAULT_LEASE_SECONDS);
        assert_eq!(
            config.dispatcher.lease_renewal(),
            Duration::from_secs(DEFAULT_LEASE_SECONDS / 3)
        );
        assert_eq!(config.backend.base_url, "http://backend:8000/api/v1");
        assert_eq!(config.backend.max_attempts, 3);
        assert_eq!(config.retention.dead_days, 14);
        assert_eq!(config.retention.job_log_days, 30);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let file = write_toml("[dispatcher]\nworkers = 0\n");
        let err = AppConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { ref field, .. } if field == "dispatcher.workers"));
    }

    #[test]
    fn test_validation_rules() {
        let mut config = AppConfig::default();
        config.backend.backoff_factor = 0.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.backend.base_url = "not a url".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.backend.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.database.url = "mysql://localhost/db".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.web.bind_address = "localhost".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = AppConfig::from_file(Path::new("/nonexistent/decision-jobs.toml")).unwrap_err();
        assert!(matches!(err, ConfigurationError::LoadFailed { .. }));
    }
}
