use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use super::swarm::{SwarmStrategy, SwarmTopology};

/// Main configuration structure for the swarm client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Orchestration service address (ws://, wss://, http:// or https://)
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// Base URL for the one-request-per-operation fallback
    #[serde(default)]
    pub fallback_url: Option<String>,

    /// Push-event channel address; defaults to `server_url`
    #[serde(default)]
    pub realtime_url: Option<String>,

    /// Consecutive reconnect attempts before entering the error state
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    #[serde(default = "default_operation_timeout_ms")]
    pub operation_timeout_ms: u64,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Silence after which an open socket is considered dead
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,

    /// Enable the push-event channel
    #[serde(default = "default_true")]
    pub enable_realtime: bool,

    #[serde(default)]
    pub defaults: SwarmDefaults,

    #[serde(default)]
    pub realtime: RealtimeConfig,

    #[serde(default = "default_error_history_size")]
    pub error_history_size: usize,

    /// Informational feature flags; never sent to the server
    #[serde(default)]
    pub features: BTreeMap<String, bool>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_server_url() -> String {
    "ws://localhost:8080/swarm".to_string()
}

const fn default_max_retries() -> u32 {
    5
}

const fn default_retry_base_delay_ms() -> u64 {
    1000
}

const fn default_max_retry_delay_ms() -> u64 {
    30_000
}

const fn default_operation_timeout_ms() -> u64 {
    30_000
}

const fn default_connect_timeout_ms() -> u64 {
    10_000
}

const fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

const fn default_heartbeat_timeout_ms() -> u64 {
    90_000
}

const fn default_true() -> bool {
    true
}

const fn default_error_history_size() -> usize {
    100
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            fallback_url: None,
            realtime_url: None,
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            operation_timeout_ms: default_operation_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
            enable_realtime: true,
            defaults: SwarmDefaults::default(),
            realtime: RealtimeConfig::default(),
            error_history_size: default_error_history_size(),
            features: BTreeMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ..Self::default()
        }
    }

    pub const fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn realtime_url(&self) -> &str {
        self.realtime_url.as_deref().unwrap_or(&self.server_url)
    }

    pub fn feature_enabled(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }
}

/// Defaults applied when callers leave swarm settings unspecified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SwarmDefaults {
    #[serde(default)]
    pub topology: SwarmTopology,

    #[serde(default = "default_max_agents")]
    pub max_agents: usize,

    #[serde(default)]
    pub strategy: SwarmStrategy,

    /// Delay between sequential agent spawns
    #[serde(default = "default_spawn_delay_ms")]
    pub spawn_delay_ms: u64,

    /// How long termination waits for cancelled tasks to settle
    #[serde(default = "default_termination_grace_ms")]
    pub termination_grace_ms: u64,

    /// How long scale-down waits for an agent to go idle
    #[serde(default = "default_scale_down_grace_ms")]
    pub scale_down_grace_ms: u64,

    #[serde(default = "default_idle_poll_interval_ms")]
    pub idle_poll_interval_ms: u64,
}

const fn default_max_agents() -> usize {
    10
}

const fn default_spawn_delay_ms() -> u64 {
    1000
}

const fn default_termination_grace_ms() -> u64 {
    5000
}

const fn default_scale_down_grace_ms() -> u64 {
    10_000
}

const fn default_idle_poll_interval_ms() -> u64 {
    500
}

impl Default for SwarmDefaults {
    fn default() -> Self {
        Self {
            topology: SwarmTopology::default(),
            max_agents: default_max_agents(),
            strategy: SwarmStrategy::default(),
            spawn_delay_ms: default_spawn_delay_ms(),
            termination_grace_ms: default_termination_grace_ms(),
            scale_down_grace_ms: default_scale_down_grace_ms(),
            idle_poll_interval_ms: default_idle_poll_interval_ms(),
        }
    }
}

/// Push-event channel settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RealtimeConfig {
    /// Events retained in the global history
    #[serde(default = "default_history_size")]
    pub history_size: usize,

    /// Default per-stream buffer capacity
    #[serde(default = "default_stream_buffer_size")]
    pub stream_buffer_size: usize,

    #[serde(default = "default_metrics_interval_ms")]
    pub metrics_interval_ms: u64,
}

const fn default_history_size() -> usize {
    1000
}

const fn default_stream_buffer_size() -> usize {
    100
}

const fn default_metrics_interval_ms() -> u64 {
    5000
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            history_size: default_history_size(),
            stream_buffer_size: default_stream_buffer_size(),
            metrics_interval_ms: default_metrics_interval_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// Rotation: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_base_delay_ms, 1000);
        assert_eq!(config.max_retry_delay_ms, 30_000);
        assert_eq!(config.error_history_size, 100);
        assert_eq!(config.realtime.history_size, 1000);
        assert!(config.enable_realtime);
        assert_eq!(config.realtime_url(), config.server_url);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = "server_url: wss://swarm.example.com\nrealtime:\n  history_size: 50\n";
        let config: ClientConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server_url, "wss://swarm.example.com");
        assert_eq!(config.realtime.history_size, 50);
        assert_eq!(config.realtime.stream_buffer_size, 100);
        assert_eq!(config.defaults.spawn_delay_ms, 1000);
    }

    #[test]
    fn test_feature_flags() {
        let mut config = ClientConfig::default();
        config.features.insert("neural".into(), true);
        assert!(config.feature_enabled("neural"));
        assert!(!config.feature_enabled("missing"));
    }
}
