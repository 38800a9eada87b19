//! MQTT transport for the event stream
//!
//! Topics are used verbatim as MQTT topic filters, so `/topic/logs` on the
//! broker carries the same payloads as the STOMP destination of that name.

use crate::infra::config::Config;
use crate::io::stream::{InboundMessage, ProtocolError, StreamError, Transport};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, info};

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 100;

pub struct MqttTransport {
    host: String,
    port: u16,
    client_id: String,
    credentials: Option<(String, String)>,
    session: Option<(AsyncClient, EventLoop)>,
}

impl MqttTransport {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            client_id: format!("ticket-dashboard-{}", std::process::id()),
            credentials: None,
            session: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        let mut transport = Self::new(config.mqtt_host(), config.mqtt_port());
        if let (Some(username), Some(password)) = (config.stream_username(), config.stream_password())
        {
            transport.credentials = Some((username.to_string(), password.to_string()));
        }
        transport
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(KEEP_ALIVE);
        if let Some((username, password)) = &self.credentials {
            options.set_credentials(username.clone(), password.clone());
        }
        options
    }

    fn client(&self) -> Result<&AsyncClient, StreamError> {
        self.session.as_ref().map(|(client, _)| client).ok_or(StreamError::NotConnected)
    }
}

#[async_trait]
impl Transport for MqttTransport {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    async fn connect(&mut self) -> Result<(), StreamError> {
        self.session = None;
        let (client, mut eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);

        loop {
            if let Event::Incoming(Packet::ConnAck(ack)) = eventloop.poll().await? {
                info!(host = %self.host, port = %self.port, code = ?ack.code, "mqtt_connected");
                break;
            }
        }

        self.session = Some((client, eventloop));
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), StreamError> {
        self.client()?.subscribe(topic, QoS::AtMostOnce).await?;
        Ok(())
    }

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), StreamError> {
        self.client()?.unsubscribe(topic).await?;
        Ok(())
    }

    async fn next_message(&mut self) -> Result<Option<InboundMessage>, StreamError> {
        let Some((_, eventloop)) = self.session.as_mut() else {
            return Err(StreamError::NotConnected);
        };

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let body = String::from_utf8(publish.payload.to_vec()).map_err(|_| {
                        ProtocolError::InvalidPayload {
                            topic: publish.topic.clone(),
                            reason: "invalid utf-8".to_string(),
                        }
                    })?;
                    return Ok(Some(InboundMessage { topic: publish.topic, body }));
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    self.session = None;
                    return Ok(None);
                }
                Ok(event) => debug!(?event, "mqtt_event"),
                Err(e) => {
                    self.session = None;
                    return Err(e.into());
                }
            }
        }
    }

    async fn disconnect(&mut self) -> Result<(), StreamError> {
        if let Some((client, _eventloop)) = self.session.take() {
            // Request is queued only; the eventloop is dropped right after
            client.try_disconnect()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_connected_before_connect() {
        let transport = MqttTransport::new("localhost", 1883);
        assert!(matches!(transport.client(), Err(StreamError::NotConnected)));
    }

    #[tokio::test]
    async fn test_next_message_requires_session() {
        let mut transport = MqttTransport::new("localhost", 1883);
        let result = transport.next_message().await;
        assert!(matches!(result, Err(StreamError::NotConnected)));
    }

    #[tokio::test]
    async fn test_disconnect_without_session_is_noop() {
        let mut transport = MqttTransport::new("localhost", 1883);
        assert!(transport.disconnect().await.is_ok());
    }

    #[test]
    fn test_client_id_is_per_process() {
        let transport = MqttTransport::new("localhost", 1883);
        assert!(transport.client_id.starts_with("ticket-dashboard-"));
    }
}
