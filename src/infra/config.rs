//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/dev.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Push channel transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// STOMP 1.2 over WebSocket
    Stomp,
    /// MQTT 3.1.1 over TCP
    Mqtt,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Stomp => "stomp",
            TransportKind::Mqtt => "mqtt",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Status poll cadence
    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
            status_poll_interval_ms: default_status_poll_interval_ms(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_timeout_ms() -> u64 {
    5000
}

fn default_status_poll_interval_ms() -> u64 {
    2000
}

#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_transport")]
    pub transport: TransportKind,
    /// WebSocket URL for the STOMP transport
    #[serde(default = "default_stream_url")]
    pub url: String,
    #[serde(default = "default_mqtt_host")]
    pub mqtt_host: String,
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_log_topic")]
    pub log_topic: String,
    #[serde(default = "default_availability_topic")]
    pub availability_topic: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Per-subscriber channel capacity
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            transport: default_transport(),
            url: default_stream_url(),
            mqtt_host: default_mqtt_host(),
            mqtt_port: default_mqtt_port(),
            username: None,
            password: None,
            log_topic: default_log_topic(),
            availability_topic: default_availability_topic(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

fn default_transport() -> TransportKind {
    TransportKind::Stomp
}

fn default_stream_url() -> String {
    // Raw WebSocket endpoint behind the SockJS handshake path
    "ws://localhost:8080/websocket/websocket".to_string()
}

fn default_mqtt_host() -> String {
    "localhost".to_string()
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_log_topic() -> String {
    "/topic/logs".to_string()
}

fn default_availability_topic() -> String {
    "/topic/ticketAvailability".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_subscriber_buffer() -> usize {
    256
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Maximum retained log lines. 0 (the default) keeps every line.
    #[serde(default = "default_max_log_entries")]
    pub max_entries: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { max_entries: default_max_log_entries() }
    }
}

fn default_max_log_entries() -> usize {
    0
}

#[derive(Debug, Clone, Deserialize)]
pub struct UiConfig {
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_max_notifications")]
    pub max_notifications: usize,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self { tick_ms: default_tick_ms(), max_notifications: default_max_notifications() }
    }
}

fn default_tick_ms() -> u64 {
    100
}

fn default_max_notifications() -> usize {
    5
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Periodic metrics report interval (0 to disable)
    #[serde(default = "default_metrics_interval")]
    pub interval_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { interval_secs: default_metrics_interval() }
    }
}

fn default_metrics_interval() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log file for the terminal UI
    #[serde(default = "default_log_file")]
    pub file: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { file: default_log_file() }
    }
}

fn default_log_file() -> String {
    "ticket-dashboard.log".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Main configuration struct used throughout the application
#[derive(Debug, Clone)]
pub struct Config {
    base_url: String,
    timeout_ms: u64,
    status_poll_interval_ms: u64,
    transport: TransportKind,
    stream_url: String,
    mqtt_host: String,
    mqtt_port: u16,
    stream_username: Option<String>,
    stream_password: Option<String>,
    log_topic: String,
    availability_topic: String,
    reconnect_delay_ms: u64,
    connect_timeout_ms: u64,
    subscriber_buffer: usize,
    max_log_entries: usize,
    tick_ms: u64,
    max_notifications: usize,
    metrics_interval_secs: u64,
    log_file: String,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::from_toml(TomlConfig::default(), "default".to_string())
    }
}

impl Config {
    fn from_toml(toml_config: TomlConfig, config_file: String) -> Self {
        Self {
            base_url: toml_config.service.base_url.trim_end_matches('/').to_string(),
            timeout_ms: toml_config.service.timeout_ms,
            status_poll_interval_ms: toml_config.service.status_poll_interval_ms,
            transport: toml_config.stream.transport,
            stream_url: toml_config.stream.url,
            mqtt_host: toml_config.stream.mqtt_host,
            mqtt_port: toml_config.stream.mqtt_port,
            stream_username: toml_config.stream.username,
            stream_password: toml_config.stream.password,
            log_topic: toml_config.stream.log_topic,
            availability_topic: toml_config.stream.availability_topic,
            reconnect_delay_ms: toml_config.stream.reconnect_delay_ms,
            connect_timeout_ms: toml_config.stream.connect_timeout_ms,
            subscriber_buffer: toml_config.stream.subscriber_buffer.max(1),
            max_log_entries: toml_config.log.max_entries,
            tick_ms: toml_config.ui.tick_ms,
            max_notifications: toml_config.ui.max_notifications,
            metrics_interval_secs: toml_config.metrics.interval_secs,
            log_file: toml_config.logging.file,
            config_file,
        }
    }

    /// Determine config file path from an explicit argument or environment
    pub fn resolve_config_path(cli_path: Option<&str>) -> String {
        if let Some(path) = cli_path {
            return path.to_string();
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/dev.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self::from_toml(toml_config, path.display().to_string()))
    }

    /// Load configuration - tries TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {:#}. Using defaults.", e);
                Self::default()
            }
        }
    }

    /// Resolve the config path and load it
    pub fn load(cli_path: Option<&str>) -> Self {
        Self::load_from_path(&Self::resolve_config_path(cli_path))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms)
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn stream_url(&self) -> &str {
        &self.stream_url
    }

    pub fn mqtt_host(&self) -> &str {
        &self.mqtt_host
    }

    pub fn mqtt_port(&self) -> u16 {
        self.mqtt_port
    }

    pub fn stream_username(&self) -> Option<&str> {
        self.stream_username.as_deref()
    }

    pub fn stream_password(&self) -> Option<&str> {
        self.stream_password.as_deref()
    }

    pub fn log_topic(&self) -> &str {
        &self.log_topic
    }

    pub fn availability_topic(&self) -> &str {
        &self.availability_topic
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn subscriber_buffer(&self) -> usize {
        self.subscriber_buffer
    }

    /// Retained log line cap, `None` when unbounded
    pub fn max_log_entries(&self) -> Option<usize> {
        (self.max_log_entries > 0).then_some(self.max_log_entries)
    }

    pub fn tick_ms(&self) -> u64 {
        self.tick_ms
    }

    pub fn max_notifications(&self) -> usize {
        self.max_notifications
    }

    pub fn metrics_interval_secs(&self) -> u64 {
        self.metrics_interval_secs
    }

    pub fn log_file(&self) -> &str {
        &self.log_file
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }

    /// Builder method to point the dashboard at another service
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Builder method to change the status poll cadence
    pub fn with_status_poll_interval_ms(mut self, ms: u64) -> Self {
        self.status_poll_interval_ms = ms;
        self
    }

    /// Builder method to change the retained log cap (0 = unbounded)
    pub fn with_max_log_entries(mut self, max_entries: usize) -> Self {
        self.max_log_entries = max_entries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.base_url(), "http://localhost:8080");
        assert_eq!(config.status_poll_interval(), Duration::from_millis(2000));
        assert_eq!(config.transport(), TransportKind::Stomp);
        assert_eq!(config.stream_url(), "ws://localhost:8080/websocket/websocket");
        assert_eq!(config.log_topic(), "/topic/logs");
        assert_eq!(config.availability_topic(), "/topic/ticketAvailability");
        assert_eq!(config.max_log_entries(), None);
        assert_eq!(config.config_file(), "default");
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        assert_eq!(Config::resolve_config_path(Some("config/mock.toml")), "config/mock.toml");
    }

    #[test]
    fn test_partial_toml_uses_section_defaults() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
[service]
base_url = "http://ticket-host:9000/"

[stream]
transport = "mqtt"
mqtt_port = 1884
"#,
        )
        .unwrap();
        let config = Config::from_toml(toml_config, "inline".to_string());

        assert_eq!(config.base_url(), "http://ticket-host:9000");
        assert_eq!(config.timeout_ms(), 5000);
        assert_eq!(config.transport(), TransportKind::Mqtt);
        assert_eq!(config.mqtt_port(), 1884);
        assert_eq!(config.mqtt_host(), "localhost");
        assert_eq!(config.tick_ms(), 100);
    }

    #[test]
    fn test_log_cap_is_opt_in() {
        let config = Config::default().with_max_log_entries(200);
        assert_eq!(config.max_log_entries(), Some(200));
        assert_eq!(config.with_max_log_entries(0).max_log_entries(), None);
    }

    #[test]
    fn test_unknown_transport_rejected() {
        let result: Result<TomlConfig, _> = toml::from_str("[stream]\ntransport = \"amqp\"\n");
        assert!(result.is_err());
    }
}
