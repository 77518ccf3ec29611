use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::ClientConfig;

/// Project-local configuration directory.
pub const CONFIG_DIR: &str = ".swarm-client";

/// Prefix for environment overrides; nested keys are separated by `__`.
pub const ENV_PREFIX: &str = "SWARM_CLIENT_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Server URL cannot be empty")]
    EmptyServerUrl,

    #[error("Invalid {field}: {url}. Must start with one of: {allowed}")]
    InvalidUrl {
        field: &'static str,
        url: String,
        allowed: String,
    },

    #[error("Invalid operation_timeout_ms: 0. Must be positive")]
    InvalidOperationTimeout,

    #[error(
        "Invalid backoff configuration: retry_base_delay_ms ({0}) must be less than max_retry_delay_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error(
        "Invalid heartbeat configuration: heartbeat_timeout_ms ({1}) must exceed heartbeat_interval_ms ({0})"
    )]
    InvalidHeartbeat(u64, u64),

    #[error("Invalid {0}: 0. Must be at least 1")]
    ZeroCapacity(&'static str),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),
}

const SOCKET_OR_HTTP: &[&str] = &["ws://", "wss://", "http://", "https://"];
const HTTP_ONLY: &[&str] = &["http://", "https://"];

fn check_url(field: &'static str, url: &str, schemes: &[&str]) -> Result<(), ConfigError> {
    if schemes.iter().any(|s| url.starts_with(s)) {
        return Ok(());
    }
    Err(ConfigError::InvalidUrl {
        field,
        url: url.to_string(),
        allowed: schemes.join(", "),
    })
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .swarm-client/config.yaml
    /// 3. .swarm-client/local.yaml (optional local overrides)
    /// 4. Environment variables (SWARM_CLIENT_* prefix, highest priority)
    pub fn load() -> Result<ClientConfig> {
        Self::load_from_dir(CONFIG_DIR)
    }

    /// Same as [`load`](Self::load) with the YAML files read from `dir`.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<ClientConfig> {
        let dir = dir.as_ref();
        let config: ClientConfig = Figment::new()
            .merge(Serialized::defaults(ClientConfig::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<ClientConfig> {
        let config: ClientConfig = Figment::new()
            .merge(Serialized::defaults(ClientConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &ClientConfig) -> Result<(), ConfigError> {
        if config.server_url.trim().is_empty() {
            return Err(ConfigError::EmptyServerUrl);
        }
        check_url("server_url", &config.server_url, SOCKET_OR_HTTP)?;
        if let Some(url) = &config.realtime_url {
            check_url("realtime_url", url, SOCKET_OR_HTTP)?;
        }
        if let Some(url) = &config.fallback_url {
            check_url("fallback_url", url, HTTP_ONLY)?;
        }

        if config.operation_timeout_ms == 0 {
            return Err(ConfigError::InvalidOperationTimeout);
        }

        if config.retry_base_delay_ms >= config.max_retry_delay_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry_base_delay_ms,
                config.max_retry_delay_ms,
            ));
        }

        if config.heartbeat_timeout_ms <= config.heartbeat_interval_ms {
            return Err(ConfigError::InvalidHeartbeat(
                config.heartbeat_interval_ms,
                config.heartbeat_timeout_ms,
            ));
        }

        if config.realtime.history_size == 0 {
            return Err(ConfigError::ZeroCapacity("realtime.history_size"));
        }
        if config.realtime.stream_buffer_size == 0 {
            return Err(ConfigError::ZeroCapacity("realtime.stream_buffer_size"));
        }
        if config.error_history_size == 0 {
            return Err(ConfigError::ZeroCapacity("error_history_size"));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_validate_empty_server_url() {
        let config = ClientConfig::new("  ");
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::EmptyServerUrl
        ));
    }

    #[test]
    fn test_validate_bad_scheme() {
        let config = ClientConfig::new("ftp://swarm");
        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidUrl { field, url, .. } => {
                assert_eq!(field, "server_url");
                assert_eq!(url, "ftp://swarm");
            }
            other => panic!("Expected InvalidUrl error, got {other:?}"),
        }

        let mut config = ClientConfig::default();
        config.fallback_url = Some("ws://not-http".into());
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidUrl { field: "fallback_url", .. }
        ));
    }

    #[test]
    fn test_validate_invalid_backoff() {
        let mut config = ClientConfig::default();
        config.retry_base_delay_ms = 30_000;
        config.max_retry_delay_ms = 10_000;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidBackoff(30_000, 10_000)
        ));
    }

    #[test]
    fn test_validate_heartbeat() {
        let mut config = ClientConfig::default();
        config.heartbeat_timeout_ms = config.heartbeat_interval_ms;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidHeartbeat(_, _)
        ));
    }

    #[test]
    fn test_validate_zero_capacities() {
        let mut config = ClientConfig::default();
        config.realtime.stream_buffer_size = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::ZeroCapacity("realtime.stream_buffer_size")
        ));

        let mut config = ClientConfig::default();
        config.operation_timeout_ms = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidOperationTimeout
        ));
    }

    #[test]
    fn test_validate_invalid_log_settings() {
        let mut config = ClientConfig::default();
        config.logging.level = "verbose".to_string();
        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "verbose"),
            _ => panic!("Expected InvalidLogLevel error"),
        }

        let mut config = ClientConfig::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidLogFormat(_)
        ));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "server_url: wss://swarm.example.com\nmax_retries: 3\ndefaults:\n  topology: ring"
        )
        .unwrap();
        file.flush().unwrap();

        let config = ConfigLoader::load_from_file(file.path()).unwrap();
        assert_eq!(config.server_url, "wss://swarm.example.com");
        assert_eq!(config.max_retries, 3);
        assert_eq!(
            config.defaults.topology,
            crate::domain::models::SwarmTopology::Ring
        );
        assert_eq!(config.operation_timeout_ms, 30_000);
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "server_url: ''").unwrap();
        file.flush().unwrap();
        assert!(ConfigLoader::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_hierarchical_merging_with_env() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.yaml"),
            "server_url: ws://base:9000\nmax_retries: 2\nlogging:\n  level: info\n  format: json\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("local.yaml"),
            "max_retries: 4\nlogging:\n  level: debug\n",
        )
        .unwrap();

        temp_env::with_vars(
            [
                ("SWARM_CLIENT_OPERATION_TIMEOUT_MS", Some("1500")),
                ("SWARM_CLIENT_FEATURES__NEURAL", Some("true")),
            ],
            || {
                let config = ConfigLoader::load_from_dir(dir.path()).unwrap();
                assert_eq!(config.server_url, "ws://base:9000");
                assert_eq!(config.max_retries, 4, "local override should win");
                assert_eq!(config.logging.level, "debug");
                assert_eq!(config.logging.format, "json", "base value should persist");
                assert_eq!(config.operation_timeout_ms, 1500, "env should win");
                assert!(config.feature_enabled("neural"));
            },
        );
    }
}
