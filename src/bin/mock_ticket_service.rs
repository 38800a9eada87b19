//! Mock ticket service
//!
//! Stands in for the remote simulation during local development.
//!
//! REST (plain-text responses):
//! - GET  /api/ticket/status    -> "System is currently running|stopped"
//! - POST /api/ticket/configure -> 400 "Invalid configuration provided." unless
//!   total > 0, both rates > 1000 ms and capacity <= total
//! - POST /api/ticket/start     -> 400 "Configuration not set" / "System is already running"
//! - POST /api/ticket/stop
//!
//! While running, a vendor ticker releases one ticket per release interval (up to
//! max capacity) and a customer ticker retrieves one per retrieval interval. Each
//! event is published on the log topic, and availability changes on the
//! availability topic, through an embedded MQTT broker.
//!
//! Usage:
//!   cargo run --bin mock-ticket-service -- --port 8080 --mqtt-port 1883
//!   cargo run --bin mock-ticket-service -- --envelope   # {"id","message"} log payloads

use anyhow::Context;
use bytes::Bytes;
use clap::Parser;
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use ticket_dashboard::infra::broker::start_embedded_broker;
use ticket_dashboard::infra::logging::{init_tracing, LogSink};
use ticket_dashboard::infra::Config;
use ticket_dashboard::io::api::{CONFIGURE_PATH, START_PATH, STATUS_PATH, STOP_PATH};
use time::macros::format_description;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "mock-ticket-service")]
#[command(about = "Mock ticket release service for local development")]
struct Args {
    /// Address to bind HTTP and MQTT listeners
    #[arg(long, default_value = "127.0.0.1")]
    bind: String,

    /// HTTP port
    #[arg(short, long, default_value = "8080")]
    port: u16,

    /// Embedded MQTT broker port
    #[arg(long, default_value = "1883")]
    mqtt_port: u16,

    /// Number of simulated vendors (ids cycle 1..=N)
    #[arg(long, default_value = "5")]
    vendors: u64,

    /// Number of simulated customers (ids cycle 1..=N)
    #[arg(long, default_value = "5")]
    customers: u64,

    /// Publish log lines as {"id": n, "message": "..."} instead of plain text
    #[arg(long)]
    envelope: bool,

    /// Dashboard config file, used for topic names
    #[arg(short, long)]
    config: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SimConfig {
    total_tickets: u64,
    release_rate_ms: u64,
    retrieval_rate_ms: u64,
    max_capacity: u64,
}

impl SimConfig {
    /// Accepts numbers or numeric strings for each field
    fn from_json(body: &[u8]) -> Option<Self> {
        let value: Value = serde_json::from_slice(body).ok()?;
        let field = |key: &str| match value.get(key)? {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        Some(Self {
            total_tickets: field("totalTickets")?,
            release_rate_ms: field("ticketReleaseRate")?,
            retrieval_rate_ms: field("customerRetrievalRate")?,
            max_capacity: field("maxTicketCapacity")?,
        })
    }

    fn is_valid(&self) -> bool {
        self.total_tickets > 0
            && self.release_rate_ms > 1000
            && self.retrieval_rate_ms > 1000
            && self.max_capacity <= self.total_tickets
    }
}

/// A log line plus the availability it produced, if it changed
type SimEvent = (String, Option<(u64, u64)>);

#[derive(Default)]
struct SimState {
    config: Option<SimConfig>,
    running: bool,
    available: u64,
    task: Option<JoinHandle<()>>,
}

impl SimState {
    fn configure(&mut self, body: &[u8]) -> Result<SimConfig, &'static str> {
        match SimConfig::from_json(body) {
            Some(config) if config.is_valid() => {
                self.config = Some(config);
                Ok(config)
            }
            _ => Err("Invalid configuration provided."),
        }
    }

    fn start(&mut self) -> Result<SimConfig, &'static str> {
        let config = self.config.ok_or("Configuration not set")?;
        if self.running {
            return Err("System is already running");
        }
        self.running = true;
        self.available = 0;
        Ok(config)
    }

    fn stop(&mut self) {
        self.running = false;
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    fn status(&self) -> String {
        format!("System is currently {}", if self.running { "running" } else { "stopped" })
    }

    fn release(&mut self, vendor: u64) -> Option<SimEvent> {
        let config = self.config?;
        if !self.running || self.available >= config.max_capacity {
            return None;
        }
        self.available += 1;
        Some((
            format!("Vendor {} added a ticket. Available tickets: {}", vendor, self.available),
            Some((config.total_tickets, self.available)),
        ))
    }

    fn retrieve(&mut self, customer: u64) -> Option<SimEvent> {
        let config = self.config?;
        if !self.running {
            return None;
        }
        if self.available == 0 {
            return Some((
                format!("Customer {} tried to buy a ticket, but none were available.", customer),
                None,
            ));
        }
        self.available -= 1;
        Some((
            format!("Customer {} bought a ticket. Available tickets: {}", customer, self.available),
            Some((config.total_tickets, self.available)),
        ))
    }
}

struct Publisher {
    client: AsyncClient,
    log_topic: String,
    availability_topic: String,
    envelope: bool,
    next_id: AtomicU64,
}

impl Publisher {
    async fn log(&self, message: &str) {
        let timestamp = OffsetDateTime::now_utc()
            .format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
            .unwrap_or_default();
        let line = format!("{} - {}", timestamp, message);
        let payload = if self.envelope {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            json!({ "id": id, "message": line }).to_string()
        } else {
            line
        };
        self.publish(&self.log_topic, payload).await;
    }

    async fn availability(&self, total: u64, available: u64) {
        let payload = json!({ "totalTickets": total, "availableTickets": available }).to_string();
        self.publish(&self.availability_topic, payload).await;
    }

    async fn publish(&self, topic: &str, payload: String) {
        if let Err(e) = self.client.publish(topic, QoS::AtMostOnce, false, payload).await {
            warn!(error = %e, topic = %topic, "mock_publish_failed");
        }
    }

    async fn event(&self, event: SimEvent) {
        let (line, availability) = event;
        self.log(&line).await;
        if let Some((total, available)) = availability {
            self.availability(total, available).await;
        }
    }
}

struct Service {
    state: Mutex<SimState>,
    publisher: Publisher,
    vendors: u64,
    customers: u64,
}

async fn run_simulation(service: Arc<Service>, config: SimConfig) {
    let mut release = tokio::time::interval(Duration::from_millis(config.release_rate_ms));
    let mut retrieval = tokio::time::interval(Duration::from_millis(config.retrieval_rate_ms));
    release.set_missed_tick_behavior(MissedTickBehavior::Delay);
    retrieval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Skip the immediate first ticks
    release.tick().await;
    retrieval.tick().await;

    let mut vendor = 0;
    let mut customer = 0;
    loop {
        let event = tokio::select! {
            _ = release.tick() => {
                vendor = vendor % service.vendors.max(1) + 1;
                service.state.lock().release(vendor)
            }
            _ = retrieval.tick() => {
                customer = customer % service.customers.max(1) + 1;
                service.state.lock().retrieve(customer)
            }
        };
        if let Some(event) = event {
            service.publisher.event(event).await;
        }
    }
}

fn text(status: StatusCode, body: impl Into<String>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body.into())));
    *response.status_mut() = status;
    if let Ok(value) = "*".parse() {
        response.headers_mut().insert("Access-Control-Allow-Origin", value);
    }
    if let Ok(value) = "text/plain; charset=utf-8".parse() {
        response.headers_mut().insert("Content-Type", value);
    }
    response
}

async fn handle_request(
    req: Request<hyper::body::Incoming>,
    service: Arc<Service>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match (method, path.as_str()) {
        (Method::GET, STATUS_PATH) => text(StatusCode::OK, service.state.lock().status()),
        (Method::POST, CONFIGURE_PATH) => {
            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!(error = %e, "mock_body_read_failed");
                    return Ok(text(StatusCode::BAD_REQUEST, "Invalid configuration provided."));
                }
            };
            let result = service.state.lock().configure(&body);
            match result {
                Ok(config) => {
                    info!(?config, "mock_configured");
                    service
                        .publisher
                        .log(&format!(
                            "Configuration updated: Total Tickets={}, Ticket Release Rate={}ms, \
                             Customer Retrieval Rate={}ms, Max Ticket Capacity={}",
                            config.total_tickets,
                            config.release_rate_ms,
                            config.retrieval_rate_ms,
                            config.max_capacity
                        ))
                        .await;
                    text(StatusCode::OK, "Configuration saved successfully")
                }
                Err(message) => text(StatusCode::BAD_REQUEST, message),
            }
        }
        (Method::POST, START_PATH) => {
            let result = {
                let mut state = service.state.lock();
                state.start().map(|config| {
                    state.task = Some(tokio::spawn(run_simulation(service.clone(), config)));
                })
            };
            match result {
                Ok(()) => {
                    info!("mock_started");
                    service.publisher.log("System started.").await;
                    text(StatusCode::OK, "System started successfully")
                }
                Err(message) => text(StatusCode::BAD_REQUEST, message),
            }
        }
        (Method::POST, STOP_PATH) => {
            service.state.lock().stop();
            info!("mock_stopped");
            service.publisher.log("System stopped.").await;
            text(StatusCode::OK, "System stopped")
        }
        (Method::OPTIONS, _) => {
            let mut response = text(StatusCode::OK, "");
            if let Ok(value) = "GET, POST, OPTIONS".parse() {
                response.headers_mut().insert("Access-Control-Allow-Methods", value);
            }
            if let Ok(value) = "Content-Type".parse() {
                response.headers_mut().insert("Access-Control-Allow-Headers", value);
            }
            response
        }
        _ => text(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(LogSink::Stderr)?;
    let config = Config::load(args.config.as_deref());

    start_embedded_broker(&args.bind, args.mqtt_port)?;

    // Publisher connects back to the embedded broker
    let broker_host = if args.bind == "0.0.0.0" { "127.0.0.1".to_string() } else { args.bind.clone() };
    let mut options = MqttOptions::new("mock-ticket-service", broker_host, args.mqtt_port);
    options.set_keep_alive(Duration::from_secs(30));
    let (client, mut eventloop) = AsyncClient::new(options, 1000);
    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                warn!(error = %e, "mock_publisher_error");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    let service = Arc::new(Service {
        state: Mutex::new(SimState::default()),
        publisher: Publisher {
            client,
            log_topic: config.log_topic().to_string(),
            availability_topic: config.availability_topic().to_string(),
            envelope: args.envelope,
            next_id: AtomicU64::new(1),
        },
        vendors: args.vendors,
        customers: args.customers,
    });

    let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
        .parse()
        .with_context(|| format!("invalid bind address {}:{}", args.bind, args.port))?;
    let listener = TcpListener::bind(addr).await.with_context(|| format!("failed to bind {}", addr))?;
    info!(
        http = %addr,
        mqtt_port = %args.mqtt_port,
        log_topic = %config.log_topic(),
        availability_topic = %config.availability_topic(),
        envelope = %args.envelope,
        "mock_ticket_service_started"
    );

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let service = service.clone();
                        tokio::spawn(async move {
                            let handler = service_fn(move |req| handle_request(req, service.clone()));
                            if let Err(e) = http1::Builder::new().serve_connection(io, handler).await {
                                error!(error = %e, "mock_http_error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "mock_accept_error"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown_signal_received");
                service.state.lock().stop();
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured(capacity: u64) -> SimState {
        let mut state = SimState::default();
        let body = json!({
            "totalTickets": "10",
            "ticketReleaseRate": "1500",
            "customerRetrievalRate": 2000,
            "maxTicketCapacity": capacity.to_string(),
        });
        state.configure(body.to_string().as_bytes()).unwrap();
        state
    }

    #[test]
    fn test_configure_validation() {
        let mut state = SimState::default();
        let bad = json!({
            "totalTickets": "10",
            "ticketReleaseRate": "1000",
            "customerRetrievalRate": "2000",
            "maxTicketCapacity": "5",
        });
        assert_eq!(state.configure(bad.to_string().as_bytes()), Err("Invalid configuration provided."));
        assert_eq!(state.configure(b"not json"), Err("Invalid configuration provided."));
        assert!(state.config.is_none());
    }

    #[test]
    fn test_start_preconditions() {
        let mut state = SimState::default();
        assert_eq!(state.start(), Err("Configuration not set"));

        let mut state = configured(5);
        assert!(state.start().is_ok());
        assert_eq!(state.status(), "System is currently running");
        assert_eq!(state.start(), Err("System is already running"));

        state.stop();
        assert_eq!(state.status(), "System is currently stopped");
    }

    #[test]
    fn test_release_capped_at_capacity() {
        let mut state = configured(2);
        state.start().unwrap();
        assert!(state.release(1).is_some());
        let (line, availability) = state.release(2).unwrap();
        assert_eq!(line, "Vendor 2 added a ticket. Available tickets: 2");
        assert_eq!(availability, Some((10, 2)));
        assert!(state.release(3).is_none());
    }

    #[test]
    fn test_retrieve_when_empty() {
        let mut state = configured(2);
        state.start().unwrap();
        let (line, availability) = state.retrieve(1).unwrap();
        assert_eq!(line, "Customer 1 tried to buy a ticket, but none were available.");
        assert!(availability.is_none());

        state.release(1);
        let (_, availability) = state.retrieve(1).unwrap();
        assert_eq!(availability, Some((10, 0)));
    }

    #[test]
    fn test_stopped_simulation_is_idle() {
        let mut state = configured(2);
        assert!(state.release(1).is_none());
        assert!(state.retrieve(1).is_none());
    }
}
