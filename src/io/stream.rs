//! Shared push-channel connection with reference-counted topic subscriptions
//!
//! One `EventStream` owns one transport connection for the whole process.
//! Consumers call `subscribe(topic)`; the first live subscription of a topic
//! issues the transport SUBSCRIBE, and dropping the last one issues UNSUBSCRIBE.
//!
//! The connection task reconnects after transport loss and re-subscribes every
//! topic that still has subscribers, so consumers never re-subscribe themselves.
//! Delivery is FIFO per topic; there is no ordering across topics.
//!
//! Each subscriber has a bounded buffer (`subscriber_buffer`). The connection
//! task never waits on a slow consumer: when a buffer is full the message is
//! dropped for that subscriber only, counted in `subscriber_drops` and warned
//! about at most once per second. Other subscribers of the topic still receive
//! it. Consumers that must see every message keep up with the stream or raise
//! the buffer.

use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use async_trait::async_trait;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One message delivered on a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub body: String,
}

/// Malformed or rejected push-channel traffic
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("broker error: {0}")]
    Broker(String),

    #[error("unexpected frame {0} while connecting")]
    UnexpectedFrame(String),

    #[error("invalid payload on {topic}: {reason}")]
    InvalidPayload { topic: String, reason: String },
}

impl ProtocolError {
    /// Whether the connection is still usable after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProtocolError::MalformedFrame(_) | ProtocolError::InvalidPayload { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("mqtt connection error: {0}")]
    Mqtt(#[from] rumqttc::ConnectionError),

    #[error("mqtt client error: {0}")]
    MqttClient(#[from] rumqttc::ClientError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("connect timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("transport not connected")]
    NotConnected,
}

/// A broker connection able to carry named topics
///
/// `next_message` must be cancel safe: the connection task races it against
/// subscription commands.
#[async_trait]
pub trait Transport: Send {
    fn name(&self) -> &'static str;

    async fn connect(&mut self) -> Result<(), StreamError>;

    async fn subscribe(&mut self, topic: &str) -> Result<(), StreamError>;

    async fn unsubscribe(&mut self, topic: &str) -> Result<(), StreamError>;

    /// Next inbound message, `Ok(None)` once the peer has closed the connection
    async fn next_message(&mut self) -> Result<Option<InboundMessage>, StreamError>;

    async fn disconnect(&mut self) -> Result<(), StreamError>;
}

/// Transport connection state as seen by consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Disconnected => "DISCONNECTED",
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamSettings {
    pub reconnect_delay: Duration,
    pub connect_timeout: Duration,
    /// Per-subscriber channel capacity
    pub subscriber_buffer: usize,
}

impl StreamSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            reconnect_delay: config.reconnect_delay(),
            connect_timeout: config.connect_timeout(),
            subscriber_buffer: config.subscriber_buffer(),
        }
    }
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self {
            reconnect_delay: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
            subscriber_buffer: 256,
        }
    }
}

#[derive(Debug)]
enum Command {
    Subscribe(String),
    Unsubscribe(String),
    Disconnect,
}

#[derive(Default)]
struct TopicEntry {
    subscribers: Vec<(u64, mpsc::Sender<InboundMessage>)>,
}

struct Shared {
    topics: Mutex<FxHashMap<String, TopicEntry>>,
    next_subscriber_id: AtomicU64,
    closed: AtomicBool,
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    subscriber_buffer: usize,
    metrics: Arc<Metrics>,
}

impl Shared {
    fn release(&self, topic: &str, id: u64) {
        let mut topics = self.topics.lock();
        let Some(entry) = topics.get_mut(topic) else { return };
        entry.subscribers.retain(|(sub_id, _)| *sub_id != id);
        if entry.subscribers.is_empty() {
            topics.remove(topic);
            // Sent under the lock so commands stay ordered with refcount changes
            let _ = self.cmd_tx.send(Command::Unsubscribe(topic.to_string()));
            debug!(topic = %topic, "stream_topic_released");
        }
    }

    /// Mark the stream closed and end every subscription.
    ///
    /// Done under the topics lock so a concurrent `subscribe` either lands
    /// before the clear or sees `closed`.
    fn close(&self) {
        let mut topics = self.topics.lock();
        self.closed.store(true, Ordering::Release);
        // Dropping the senders ends every outstanding subscription
        topics.clear();
    }
}

/// Process-wide push-channel connection manager
pub struct EventStream {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventStream {
    /// Spawn the connection task and start connecting
    pub fn connect(
        transport: Box<dyn Transport>,
        settings: StreamSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let shared = Arc::new(Shared {
            topics: Mutex::new(FxHashMap::default()),
            next_subscriber_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            cmd_tx,
            state_rx,
            subscriber_buffer: settings.subscriber_buffer.max(1),
            metrics,
        });

        let task_shared = shared.clone();
        let task = tokio::spawn(async move {
            run_connection(transport, task_shared, cmd_rx, state_tx, settings).await;
        });

        Self { shared, task: Mutex::new(Some(task)) }
    }

    /// Bind a new consumer to `topic`
    pub fn subscribe(&self, topic: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(self.shared.subscriber_buffer);
        let id = self.shared.next_subscriber_id.fetch_add(1, Ordering::Relaxed);

        let mut topics = self.shared.topics.lock();
        if !self.shared.closed.load(Ordering::Acquire) {
            let entry = topics.entry(topic.to_string()).or_default();
            entry.subscribers.push((id, tx));
            if entry.subscribers.len() == 1 {
                let _ = self.shared.cmd_tx.send(Command::Subscribe(topic.to_string()));
            }
        }
        drop(topics);

        Subscription { topic: topic.to_string(), id, rx, shared: self.shared.clone() }
    }

    /// Live subscriber count for a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.shared.topics.lock().get(topic).map(|e| e.subscribers.len()).unwrap_or(0)
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state_rx.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_rx.clone()
    }

    /// Close the transport and wait for the connection task to finish.
    ///
    /// Outstanding subscriptions end (their `recv` returns `None`).
    pub async fn disconnect(&self) {
        let _ = self.shared.cmd_tx.send(Command::Disconnect);
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        // Teardown without an explicit disconnect still closes the transport
        let _ = self.shared.cmd_tx.send(Command::Disconnect);
    }
}

/// A live topic binding; dropping it releases the topic reference
pub struct Subscription {
    topic: String,
    id: u64,
    rx: mpsc::Receiver<InboundMessage>,
    shared: Arc<Shared>,
}

impl Subscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message on this topic, `None` once the stream is disconnected
    pub async fn recv(&mut self) -> Option<InboundMessage> {
        self.rx.recv().await
    }

    /// Invoke `handler` once per inbound message on a spawned task.
    ///
    /// Dropping the returned guard cancels the task and releases the subscription.
    pub fn spawn_handler<F>(mut self, mut handler: F) -> HandlerGuard
    where
        F: FnMut(InboundMessage) + Send + 'static,
    {
        let topic = self.topic.clone();
        let handle = tokio::spawn(async move {
            while let Some(message) = self.recv().await {
                handler(message);
            }
            debug!(topic = %self.topic, "stream_handler_finished");
        });
        HandlerGuard { topic, handle }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.shared.release(&self.topic, self.id);
    }
}

/// Owns a spawned message handler; aborts it on drop
pub struct HandlerGuard {
    topic: String,
    handle: JoinHandle<()>,
}

impl HandlerGuard {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for HandlerGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn active_topics(shared: &Shared) -> Vec<String> {
    shared.topics.lock().keys().cloned().collect()
}

fn dispatch(shared: &Shared, message: InboundMessage, last_drop_warn: &mut Instant) {
    let topics = shared.topics.lock();
    let Some(entry) = topics.get(&message.topic) else {
        debug!(topic = %message.topic, "stream_message_without_subscriber");
        return;
    };

    for (_, tx) in &entry.subscribers {
        match tx.try_send(message.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                shared.metrics.record_subscriber_drop();
                // Rate-limit drop warnings to 1 per second
                if last_drop_warn.elapsed() > Duration::from_secs(1) {
                    warn!(topic = %message.topic, "stream_message_dropped: subscriber full");
                    *last_drop_warn = Instant::now();
                }
            }
            // Receiver is mid-drop; its release() will clean up
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

/// Sleep out the reconnect delay; returns true if a disconnect was requested meanwhile
async fn wait_before_reconnect(
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
    delay: Duration,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);

    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Disconnect) | None => return true,
                // Topic registry is re-read on connect
                Some(_) => {}
            }
        }
    }
}

async fn run_connection(
    mut transport: Box<dyn Transport>,
    shared: Arc<Shared>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    settings: StreamSettings,
) {
    let name = transport.name();
    let mut subscribed: FxHashSet<String> = FxHashSet::default();
    let mut last_drop_warn = Instant::now() - Duration::from_secs(2);

    'connection: loop {
        state_tx.send_replace(ConnectionState::Connecting);

        let connected = match tokio::time::timeout(settings.connect_timeout, transport.connect()).await
        {
            Ok(result) => result,
            Err(_) => Err(StreamError::ConnectTimeout(settings.connect_timeout)),
        };

        if let Err(e) = connected {
            warn!(transport = %name, error = %e, "stream_connect_failed");
            state_tx.send_replace(ConnectionState::Disconnected);
            if wait_before_reconnect(&mut cmd_rx, settings.reconnect_delay).await {
                break 'connection;
            }
            continue;
        }

        shared.metrics.record_stream_connected();
        state_tx.send_replace(ConnectionState::Connected);
        info!(transport = %name, "stream_connected");

        subscribed.clear();
        let mut session_ok = true;
        for topic in active_topics(&shared) {
            match transport.subscribe(&topic).await {
                Ok(()) => {
                    info!(transport = %name, topic = %topic, "stream_subscribed");
                    subscribed.insert(topic);
                }
                Err(e) => {
                    warn!(transport = %name, topic = %topic, error = %e, "stream_subscribe_failed");
                    session_ok = false;
                    break;
                }
            }
        }

        let stop_requested = if session_ok {
            loop {
                tokio::select! {
                    cmd = cmd_rx.recv() => match cmd {
                        Some(Command::Subscribe(topic)) => {
                            if subscribed.insert(topic.clone()) {
                                if let Err(e) = transport.subscribe(&topic).await {
                                    warn!(transport = %name, topic = %topic, error = %e, "stream_subscribe_failed");
                                    break false;
                                }
                                info!(transport = %name, topic = %topic, "stream_subscribed");
                            }
                        }
                        Some(Command::Unsubscribe(topic)) => {
                            if subscribed.remove(&topic) {
                                if let Err(e) = transport.unsubscribe(&topic).await {
                                    warn!(transport = %name, topic = %topic, error = %e, "stream_unsubscribe_failed");
                                    break false;
                                }
                                info!(transport = %name, topic = %topic, "stream_unsubscribed");
                            }
                        }
                        Some(Command::Disconnect) | None => break true,
                    },
                    result = transport.next_message() => match result {
                        Ok(Some(message)) => dispatch(&shared, message, &mut last_drop_warn),
                        Ok(None) => {
                            info!(transport = %name, "stream_closed_by_peer");
                            break false;
                        }
                        Err(StreamError::Protocol(e)) if e.is_recoverable() => {
                            shared.metrics.record_protocol_error();
                            warn!(transport = %name, error = %e, "stream_frame_dropped");
                        }
                        Err(e) => {
                            warn!(transport = %name, error = %e, "stream_error");
                            break false;
                        }
                    }
                }
            }
        } else {
            false
        };

        shared.metrics.record_stream_disconnected();

        if stop_requested {
            if let Err(e) = transport.disconnect().await {
                debug!(transport = %name, error = %e, "stream_disconnect_error");
            }
            break 'connection;
        }

        state_tx.send_replace(ConnectionState::Disconnected);
        if wait_before_reconnect(&mut cmd_rx, settings.reconnect_delay).await {
            break 'connection;
        }
    }

    shared.close();
    state_tx.send_replace(ConnectionState::Disconnected);
    info!(transport = %name, "stream_disconnected");
}

/// In-memory transport shared by unit tests
#[cfg(test)]
pub(crate) mod fake {
    use super::*;

    /// Records every call; inbound `None` simulates the peer closing
    pub(crate) struct FakeTransport {
        log: Arc<Mutex<Vec<String>>>,
        inbound: mpsc::UnboundedReceiver<Option<InboundMessage>>,
    }

    impl FakeTransport {
        pub(crate) fn new() -> (
            Self,
            Arc<Mutex<Vec<String>>>,
            mpsc::UnboundedSender<Option<InboundMessage>>,
        ) {
            let log = Arc::new(Mutex::new(Vec::new()));
            let (inbound_tx, inbound) = mpsc::unbounded_channel();
            (Self { log: log.clone(), inbound }, log, inbound_tx)
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn connect(&mut self) -> Result<(), StreamError> {
            self.log.lock().push("connect".to_string());
            Ok(())
        }

        async fn subscribe(&mut self, topic: &str) -> Result<(), StreamError> {
            self.log.lock().push(format!("subscribe {topic}"));
            Ok(())
        }

        async fn unsubscribe(&mut self, topic: &str) -> Result<(), StreamError> {
            self.log.lock().push(format!("unsubscribe {topic}"));
            Ok(())
        }

        async fn next_message(&mut self) -> Result<Option<InboundMessage>, StreamError> {
            match self.inbound.recv().await {
                Some(message) => Ok(message),
                None => std::future::pending().await,
            }
        }

        async fn disconnect(&mut self) -> Result<(), StreamError> {
            self.log.lock().push("disconnect".to_string());
            Ok(())
        }
    }
}
