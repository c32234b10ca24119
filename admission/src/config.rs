//! Service configuration with TOML file support.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use provote_types::{AdmissionParams, ValidationError};
use provote_utils::LogFormat;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Parse(String),

    #[error("invalid parameters: {0}")]
    Invalid(#[from] ValidationError),
}

/// Configuration for the admission service.
///
/// Can be loaded from a TOML file via [`ServiceConfig::from_toml_file`] or
/// built programmatically (e.g. for tests).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Directory holding the LMDB environment.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// LMDB map size in bytes.
    #[serde(default = "default_map_size")]
    pub map_size: usize,

    /// Address the HTTP server binds to.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Log format: "human" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: LogFormat,

    /// Log filter used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Whether `GET /metrics` is served.
    #[serde(default = "default_true")]
    pub enable_metrics: bool,

    /// Seconds between garbage collection passes.
    #[serde(default = "default_gc_interval_secs")]
    pub gc_interval_secs: u64,

    /// Admission tunables.
    #[serde(default)]
    pub params: AdmissionParams,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_map_size() -> usize {
    1 << 30
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_log_format() -> LogFormat {
    LogFormat::Human
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_gc_interval_secs() -> u64 {
    300
}

impl ServiceConfig {
    /// Load and validate configuration from a TOML file.
    pub fn from_toml_file(path: &str) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.params.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml_string(&self) -> String {
        toml::to_string_pretty(self).expect("ServiceConfig is always serializable to TOML")
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            map_size: default_map_size(),
            listen_addr: default_listen_addr(),
            log_format: default_log_format(),
            log_level: default_log_level(),
            enable_metrics: default_true(),
            gc_interval_secs: default_gc_interval_secs(),
            params: AdmissionParams::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_round_trips_through_toml() {
        let config = ServiceConfig::default();
        let parsed = ServiceConfig::from_toml_str(&config.to_toml_string()).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn minimal_toml_uses_defaults() {
        let config = ServiceConfig::from_toml_str("").unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:8080");
        assert_eq!(config.log_format, LogFormat::Human);
        assert_eq!(config.params, AdmissionParams::standard());
    }

    #[test]
    fn partial_toml_overrides() {
        let config = ServiceConfig::from_toml_str(
            r#"
            listen_addr = "0.0.0.0:9000"
            log_format = "json"

            [params]
            rate_limit_max_requests = 10
            write_max_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.listen_addr, "0.0.0.0:9000");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.params.rate_limit_max_requests, 10);
        assert_eq!(config.params.write_max_attempts, 3);
        assert_eq!(config.params.rate_limit_window_secs, 60);
    }

    #[test]
    fn inconsistent_params_are_rejected() {
        let err = ServiceConfig::from_toml_str(
            r#"
            [params]
            write_backoff_min_ms = 900
            write_backoff_max_ms = 100
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn missing_file_returns_config_error() {
        let err = ServiceConfig::from_toml_file("/nonexistent/provote.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
