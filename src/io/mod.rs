//! IO modules - external system interfaces
//!
//! - `api` - REST client for the ticket simulation service
//! - `stream` - Shared push-channel connection with ref-counted topics
//! - `stomp` - STOMP 1.2 over WebSocket transport
//! - `mqtt` - MQTT transport

pub mod api;
pub mod mqtt;
pub mod stomp;
pub mod stream;

use crate::infra::config::{Config, TransportKind};

// Re-export commonly used types
pub use api::{HttpTicketApi, NetworkError, TicketApi};
pub use mqtt::MqttTransport;
pub use stomp::StompTransport;
pub use stream::{
    ConnectionState, EventStream, HandlerGuard, InboundMessage, ProtocolError, StreamError,
    StreamSettings, Subscription, Transport,
};

/// Build the transport selected in `[stream]`
pub fn transport_from_config(config: &Config) -> Box<dyn Transport> {
    match config.transport() {
        TransportKind::Stomp => Box::new(StompTransport::from_config(config)),
        TransportKind::Mqtt => Box::new(MqttTransport::from_config(config)),
    }
}
