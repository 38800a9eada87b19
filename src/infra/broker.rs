//! Embedded MQTT broker using rumqttd
//!
//! Used by the mock ticket service so the dashboard's MQTT transport has
//! something to connect to without an external broker.

use anyhow::Context;
use rumqttd::{Broker, Config, ConnectionSettings, RouterConfig, ServerSettings};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

fn router_config() -> RouterConfig {
    RouterConfig {
        // Dashboards and ticketctl watchers only, no retained backlog worth keeping
        max_segment_size: 1024 * 1024,
        max_segment_count: 4,
        max_connections: 64,
        max_outgoing_packet_count: 256,
        initialized_filters: None,
        ..Default::default()
    }
}

fn broker_config(listen: SocketAddr) -> Config {
    let mut servers = HashMap::new();
    servers.insert(
        "v4".to_string(),
        ServerSettings {
            name: "v4".to_string(),
            listen,
            tls: None,
            next_connection_delay_ms: 1,
            connections: ConnectionSettings {
                connection_timeout_ms: 5000,
                // Log lines and availability snapshots are small
                max_payload_size: 16 * 1024,
                max_inflight_count: 100,
                auth: None,
                dynamic_filters: true,
                external_auth: None,
            },
        },
    );

    Config {
        id: 0,
        router: router_config(),
        v4: Some(servers),
        v5: None,
        ws: None,
        prometheus: None,
        metrics: None,
        bridge: None,
        console: None,
        cluster: None,
    }
}

/// Start the embedded broker on a background thread
pub fn start_embedded_broker(bind_address: &str, port: u16) -> anyhow::Result<SocketAddr> {
    let listen: SocketAddr = format!("{}:{}", bind_address, port)
        .parse()
        .with_context(|| format!("invalid broker bind address {}:{}", bind_address, port))?;

    let config = broker_config(listen);
    thread::Builder::new()
        .name("mqtt-broker".to_string())
        .spawn(move || {
            let mut broker = Broker::new(config);
            // start() blocks for the broker's lifetime
            if let Err(e) = broker.start() {
                warn!(error = %e, "broker_start_failed");
            }
        })
        .context("failed to spawn broker thread")?;

    // Give the listener time to bind
    thread::sleep(Duration::from_millis(100));
    info!(listen = %listen, "broker_started");
    Ok(listen)
}
