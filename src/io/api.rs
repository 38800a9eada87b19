//! HTTP client for the remote ticket service
//!
//! Endpoints (all responses are plain text):
//! - GET  /api/ticket/status
//! - POST /api/ticket/configure (JSON body, numeric strings)
//! - POST /api/ticket/start
//! - POST /api/ticket/stop

use crate::domain::{ConfigField, Configuration};
use crate::infra::config::Config;
use async_trait::async_trait;
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Request failed or the service refused it
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("request to {path} failed: {source}")]
    Request {
        path: &'static str,
        #[source]
        source: reqwest::Error,
    },

    #[error("{path} returned {status}: {body}")]
    Status { path: &'static str, status: u16, body: String },

    #[error("HTTP client setup failed: {0}")]
    Client(#[source] reqwest::Error),
}

/// Remote ticket service operations used by the dashboard
#[async_trait]
pub trait TicketApi: Send + Sync {
    /// Raw status text
    async fn status(&self) -> Result<String, NetworkError>;

    /// Persist a validated configuration remotely
    async fn configure(&self, config: &Configuration) -> Result<String, NetworkError>;

    async fn start(&self) -> Result<String, NetworkError>;

    async fn stop(&self) -> Result<String, NetworkError>;
}

/// Configure request body. The service accepts the values as numeric strings.
#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigureRequest {
    pub total_tickets: String,
    pub ticket_release_rate: String,
    pub customer_retrieval_rate: String,
    pub max_ticket_capacity: String,
}

impl From<&Configuration> for ConfigureRequest {
    fn from(config: &Configuration) -> Self {
        Self {
            total_tickets: config.value(ConfigField::TotalTickets).to_string(),
            ticket_release_rate: config.value(ConfigField::TicketReleaseRate).to_string(),
            customer_retrieval_rate: config.value(ConfigField::CustomerRetrievalRate).to_string(),
            max_ticket_capacity: config.value(ConfigField::MaxTicketCapacity).to_string(),
        }
    }
}

pub const STATUS_PATH: &str = "/api/ticket/status";
pub const CONFIGURE_PATH: &str = "/api/ticket/configure";
pub const START_PATH: &str = "/api/ticket/start";
pub const STOP_PATH: &str = "/api/ticket/stop";

/// reqwest-backed `TicketApi`
pub struct HttpTicketApi {
    base_url: String,
    client: reqwest::Client,
}

impl HttpTicketApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, NetworkError> {
        // Create HTTP client once for reuse (connection pooling)
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .http1_only()
            .build()
            .map_err(NetworkError::Client)?;

        Ok(Self { base_url: base_url.trim_end_matches('/').to_string(), client })
    }

    pub fn from_config(config: &Config) -> Result<Self, NetworkError> {
        Self::new(config.base_url(), Duration::from_millis(config.timeout_ms()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send a request and read the text body; non-2xx is an error
    async fn send_text(
        &self,
        path: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<String, NetworkError> {
        let start = Instant::now();
        let response =
            request.send().await.map_err(|source| NetworkError::Request { path, source })?;
        let status = response.status();
        let body = response.text().await.map_err(|source| NetworkError::Request { path, source })?;
        let latency_us = start.elapsed().as_micros() as u64;

        if !status.is_success() {
            return Err(NetworkError::Status { path, status: status.as_u16(), body });
        }

        debug!(path = %path, status = %status.as_u16(), latency_us = %latency_us, "api_response");
        Ok(body)
    }
}

#[async_trait]
impl TicketApi for HttpTicketApi {
    async fn status(&self) -> Result<String, NetworkError> {
        self.send_text(STATUS_PATH, self.client.get(self.url(STATUS_PATH))).await
    }

    async fn configure(&self, config: &Configuration) -> Result<String, NetworkError> {
        let body = ConfigureRequest::from(config);
        let text = self
            .send_text(CONFIGURE_PATH, self.client.post(self.url(CONFIGURE_PATH)).json(&body))
            .await?;
        info!(config = %config, "api_configure_accepted");
        Ok(text)
    }

    async fn start(&self) -> Result<String, NetworkError> {
        self.send_text(START_PATH, self.client.post(self.url(START_PATH))).await
    }

    async fn stop(&self) -> Result<String, NetworkError> {
        self.send_text(STOP_PATH, self.client.post(self.url(STOP_PATH))).await
    }
}


/// In-memory service double shared by unit tests
#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct FakeState {
        running: bool,
        configured: bool,
        failing: bool,
        calls: Vec<&'static str>,
    }

    #[derive(Default)]
    pub(crate) struct FakeTicketApi {
        state: Mutex<FakeState>,
    }

    impl FakeTicketApi {
        pub(crate) fn set_running(&self, running: bool) {
            self.state.lock().running = running;
        }

        pub(crate) fn set_failing(&self, failing: bool) {
            self.state.lock().failing = failing;
        }

        pub(crate) fn calls(&self, path: &str) -> usize {
            self.state.lock().calls.iter().filter(|p| **p == path).count()
        }

        fn call(&self, path: &'static str) -> Result<parking_lot::MutexGuard<'_, FakeState>, NetworkError> {
            let mut state = self.state.lock();
            state.calls.push(path);
            if state.failing {
                return Err(NetworkError::Status {
                    path,
                    status: 503,
                    body: "Service Unavailable".to_string(),
                });
            }
            Ok(state)
        }
    }

    #[async_trait]
    impl TicketApi for FakeTicketApi {
        async fn status(&self) -> Result<String, NetworkError> {
            let state = self.call(STATUS_PATH)?;
            let word = if state.running { "running" } else { "stopped" };
            Ok(format!("System is currently {}", word))
        }

        async fn configure(&self, _config: &Configuration) -> Result<String, NetworkError> {
            let mut state = self.call(CONFIGURE_PATH)?;
            state.configured = true;
            Ok("Configuration updated successfully.".to_string())
        }

        async fn start(&self) -> Result<String, NetworkError> {
            let mut state = self.call(START_PATH)?;
            if !state.configured {
                return Err(NetworkError::Status {
                    path: START_PATH,
                    status: 400,
                    body: "Configuration not set".to_string(),
                });
            }
            state.running = true;
            Ok("System started successfully.".to_string())
        }

        async fn stop(&self) -> Result<String, NetworkError> {
            let mut state = self.call(STOP_PATH)?;
            state.running = false;
            Ok("System stopped successfully.".to_string())
        }
    }
}
