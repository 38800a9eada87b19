//! Integration tests for configuration loading

use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;
use ticket_dashboard::infra::{Config, TransportKind};

#[test]
fn test_load_config_from_file() {
    let mut temp_file = NamedTempFile::new().unwrap();

    let config_content = r#"
[service]
base_url = "http://ticket-host:9090/"
timeout_ms = 3000
status_poll_interval_ms = 500

[stream]
transport = "mqtt"
mqtt_host = "broker-host"
mqtt_port = 1884
username = "dash"
password = "secret"
log_topic = "sim/logs"
availability_topic = "sim/availability"
reconnect_delay_ms = 250
subscriber_buffer = 0

[log]
max_entries = 0

[ui]
max_notifications = 3

[metrics]
interval_secs = 0
"#;

    temp_file.write_all(config_content.as_bytes()).unwrap();
    temp_file.flush().unwrap();

    let config = Config::from_file(temp_file.path()).unwrap();

    assert_eq!(config.base_url(), "http://ticket-host:9090");
    assert_eq!(config.timeout_ms(), 3000);
    assert_eq!(config.status_poll_interval(), Duration::from_millis(500));
    assert_eq!(config.transport(), TransportKind::Mqtt);
    assert_eq!(config.mqtt_host(), "broker-host");
    assert_eq!(config.mqtt_port(), 1884);
    assert_eq!(config.stream_username(), Some("dash"));
    assert_eq!(config.stream_password(), Some("secret"));
    assert_eq!(config.log_topic(), "sim/logs");
    assert_eq!(config.availability_topic(), "sim/availability");
    assert_eq!(config.reconnect_delay(), Duration::from_millis(250));
    assert_eq!(config.subscriber_buffer(), 1);
    assert_eq!(config.max_log_entries(), None);
    assert_eq!(config.max_notifications(), 3);
    assert_eq!(config.metrics_interval_secs(), 0);
    assert_eq!(config.config_file(), temp_file.path().display().to_string());
}

#[test]
fn test_load_from_path_fallback() {
    let config = Config::load_from_path("/nonexistent/config.toml");
    assert_eq!(config.base_url(), "http://localhost:8080");
    assert_eq!(config.transport(), TransportKind::Stomp);
    assert_eq!(config.mqtt_port(), 1883);
    assert_eq!(config.config_file(), "default");
}

#[test]
fn test_malformed_file_is_an_error() {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(b"[service\nbase_url = ").unwrap();
    temp_file.flush().unwrap();

    let err = Config::from_file(temp_file.path()).unwrap_err();
    assert!(format!("{:#}", err).contains("Failed to parse config file"));
}

#[test]
fn test_shipped_configs_parse() {
    let dev = Config::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/config/dev.toml")).unwrap();
    assert_eq!(dev.transport(), TransportKind::Mqtt);
    assert_eq!(dev.log_topic(), "/topic/logs");

    let stomp =
        Config::from_file(concat!(env!("CARGO_MANIFEST_DIR"), "/config/stomp.toml")).unwrap();
    assert_eq!(stomp.transport(), TransportKind::Stomp);
    assert_eq!(stomp.stream_url(), "ws://localhost:8080/websocket/websocket");
}
