//! Dashboard controller and view lifetime
//!
//! `DashboardController` runs the operator actions (submit, start, stop) against
//! the control gate and reports each outcome as a `Notice`.
//!
//! `DashboardView` is everything scoped to one mounted dashboard: the status
//! poll, the log handler and the availability handler. Teardown (explicit or by
//! drop) cancels all three.

use crate::domain::{Configuration, ControlState};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::api::{NetworkError, TicketApi};
use crate::io::stream::{EventStream, HandlerGuard};
use crate::services::config_form::{ConfigForm, ValidationError};
use crate::services::control_gate::{GateError, SharedGate};
use crate::services::log_dedup::{LogDeduplicator, SharedLog};
use crate::services::metric_reconciler::MetricReconciler;
use crate::services::status_reconciler::StatusReconciler;
use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Success,
    Failure,
}

/// User-visible outcome of an operator action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Success, message: message.into() }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self { level: NoticeLevel::Failure, message: message.into() }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

pub struct DashboardController {
    api: Arc<dyn TicketApi>,
    gate: SharedGate,
    form: Mutex<ConfigForm>,
    notices: mpsc::UnboundedSender<Notice>,
}

impl DashboardController {
    pub fn new(
        api: Arc<dyn TicketApi>,
        gate: SharedGate,
        notices: mpsc::UnboundedSender<Notice>,
    ) -> Self {
        Self { api, gate, form: Mutex::new(ConfigForm::new()), notices }
    }

    pub fn gate(&self) -> &SharedGate {
        &self.gate
    }

    /// Form state for editing and rendering. Do not hold across an await.
    pub fn form(&self) -> MutexGuard<'_, ConfigForm> {
        self.form.lock()
    }

    fn notify(&self, notice: Notice) {
        // Receiver gone means the view is shutting down
        let _ = self.notices.send(notice);
    }

    /// Validate the form and persist the configuration.
    ///
    /// `Ok(None)` when a submission was already in flight.
    pub async fn submit(&self) -> Result<Option<ControlState>, ControlError> {
        let attempt = self.form.lock().begin_submit();
        let configuration = match attempt {
            None => return Ok(None),
            Some(Err(e)) => return Err(e.into()),
            Some(Ok(configuration)) => configuration,
        };

        let result = self.submit_configuration(configuration).await;
        self.form.lock().finish_submit();
        result.map(Some)
    }

    /// Persist an already validated configuration
    pub async fn submit_configuration(
        &self,
        configuration: Configuration,
    ) -> Result<ControlState, ControlError> {
        match self.api.configure(&configuration).await {
            Ok(body) => {
                let state = self.gate.lock().accept_configuration(configuration);
                info!(configuration = %configuration, "configuration_saved");
                let message = body.trim();
                self.notify(Notice::success(if message.is_empty() {
                    "Configuration saved."
                } else {
                    message
                }));
                Ok(state)
            }
            Err(e) => {
                warn!(error = %e, "configuration_save_failed");
                self.notify(Notice::failure("Failed to save configuration"));
                Err(e.into())
            }
        }
    }

    pub async fn start(&self) -> Result<ControlState, ControlError> {
        let authorized = self.gate.lock().begin_start();
        let ticket = match authorized {
            Ok(ticket) => ticket,
            Err(e) => {
                self.notify(Notice::failure(e.to_string()));
                return Err(e.into());
            }
        };

        match self.api.start().await {
            Ok(_) => {
                let state = {
                    let mut gate = self.gate.lock();
                    gate.complete_action(ticket);
                    gate.state()
                };
                self.notify(Notice::success("System started successfully!"));
                Ok(state)
            }
            Err(e) => {
                self.gate.lock().fail_action();
                warn!(error = %e, "system_start_failed");
                self.notify(Notice::failure(format!("Error starting system: {}", e)));
                Err(e.into())
            }
        }
    }

    pub async fn stop(&self) -> Result<ControlState, ControlError> {
        let authorized = self.gate.lock().begin_stop();
        let ticket = match authorized {
            Ok(ticket) => ticket,
            Err(e) => {
                self.notify(Notice::failure(e.to_string()));
                return Err(e.into());
            }
        };

        match self.api.stop().await {
            Ok(_) => {
                let state = {
                    let mut gate = self.gate.lock();
                    gate.complete_action(ticket);
                    gate.state()
                };
                self.notify(Notice::success("System stopped successfully!"));
                Ok(state)
            }
            Err(e) => {
                self.gate.lock().fail_action();
                warn!(error = %e, "system_stop_failed");
                self.notify(Notice::failure(format!("Error stopping system: {}", e)));
                Err(e.into())
            }
        }
    }
}

/// Settings for one mounted view
#[derive(Debug, Clone)]
pub struct ViewSettings {
    pub poll_interval: Duration,
    pub log_topic: String,
    pub availability_topic: String,
    pub max_log_entries: Option<usize>,
}

impl ViewSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.status_poll_interval(),
            log_topic: config.log_topic().to_string(),
            availability_topic: config.availability_topic().to_string(),
            max_log_entries: config.max_log_entries(),
        }
    }
}

pub struct DashboardView {
    reconciler: StatusReconciler,
    log_handler: Option<HandlerGuard>,
    availability_handler: Option<HandlerGuard>,
    log: SharedLog,
    availability: Arc<MetricReconciler>,
}

impl DashboardView {
    /// Start polling and bind both topics on the shared stream
    pub fn mount(
        api: Arc<dyn TicketApi>,
        gate: SharedGate,
        stream: &EventStream,
        settings: &ViewSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        let reconciler =
            StatusReconciler::spawn(api, gate, settings.poll_interval, metrics.clone());

        let log = LogDeduplicator::shared(settings.max_log_entries);
        let log_handler = {
            let log = log.clone();
            let metrics = metrics.clone();
            stream.subscribe(&settings.log_topic).spawn_handler(move |message| {
                let outcome = log.lock().ingest(&message.body);
                outcome.record(&metrics);
            })
        };

        let availability = Arc::new(MetricReconciler::new());
        let availability_handler = {
            let availability = availability.clone();
            stream.subscribe(&settings.availability_topic).spawn_handler(move |message| {
                match availability.ingest(&message.topic, &message.body) {
                    Ok(changed) => metrics.record_metric(changed),
                    Err(e) => {
                        metrics.record_protocol_error();
                        warn!(error = %e, "availability_payload_dropped");
                    }
                }
            })
        };

        info!(
            log_topic = %settings.log_topic,
            availability_topic = %settings.availability_topic,
            "dashboard_view_mounted"
        );

        Self {
            reconciler,
            log_handler: Some(log_handler),
            availability_handler: Some(availability_handler),
            log,
            availability,
        }
    }

    pub fn log(&self) -> &SharedLog {
        &self.log
    }

    pub fn availability(&self) -> &Arc<MetricReconciler> {
        &self.availability
    }

    pub fn is_mounted(&self) -> bool {
        self.log_handler.is_some()
    }

    /// Cancel polling and release both subscriptions. Idempotent.
    pub fn teardown(&mut self) {
        let cancelled = self.reconciler.cancel();
        let released = self.log_handler.take().is_some() | self.availability_handler.take().is_some();
        if cancelled || released {
            info!("dashboard_view_torn_down");
        }
    }
}

impl Drop for DashboardView {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ConfigField;
    use crate::io::api::fake::FakeTicketApi;
    use crate::io::api::{START_PATH, STATUS_PATH};
    use crate::io::stream::fake::FakeTransport;
    use crate::io::stream::{InboundMessage, StreamSettings};
    use crate::services::control_gate::ControlGate;

    const LOG_TOPIC: &str = "/topic/logs";
    const AVAILABILITY_TOPIC: &str = "/topic/ticketAvailability";

    fn controller() -> (DashboardController, Arc<FakeTicketApi>, mpsc::UnboundedReceiver<Notice>) {
        let api = Arc::new(FakeTicketApi::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let controller = DashboardController::new(api.clone(), ControlGate::shared(), tx);
        (controller, api, rx)
    }

    fn fill_form(controller: &DashboardController, values: [&str; 4]) {
        let mut form = controller.form();
        for field in ConfigField::ALL {
            form.set_value(field, values[field.index()]).unwrap();
        }
    }

    fn settings() -> ViewSettings {
        ViewSettings {
            poll_interval: Duration::from_millis(2000),
            log_topic: LOG_TOPIC.to_string(),
            availability_topic: AVAILABILITY_TOPIC.to_string(),
            max_log_entries: Some(100),
        }
    }

    fn stream() -> (EventStream, Arc<Mutex<Vec<String>>>, mpsc::UnboundedSender<Option<InboundMessage>>) {
        let (transport, log, inbound) = FakeTransport::new();
        let stream = EventStream::connect(
            Box::new(transport),
            StreamSettings::default(),
            Arc::new(Metrics::new()),
        );
        (stream, log, inbound)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_submit_moves_gate_to_configured() {
        let (controller, _api, mut notices) = controller();
        fill_form(&controller, ["1000", "1500", "2000", "500"]);

        let state = controller.submit().await.unwrap();
        assert_eq!(state, Some(ControlState::Configured));
        assert!(!controller.form().is_submitting());
        assert_eq!(notices.recv().await.unwrap().level, NoticeLevel::Success);
    }

    #[tokio::test]
    async fn test_invalid_form_makes_no_request() {
        let (controller, api, _notices) = controller();
        fill_form(&controller, ["1000", "1000", "2000", "500"]);

        let err = controller.submit().await.unwrap_err();
        assert!(matches!(err, ControlError::Validation(ValidationError::ReleaseRateTooLow)));
        assert_eq!(api.calls("/api/ticket/configure"), 0);
        assert_eq!(controller.gate().lock().state(), ControlState::Unconfigured);
    }

    #[tokio::test]
    async fn test_start_without_configuration_rejected_locally() {
        let (controller, api, mut notices) = controller();

        let err = controller.start().await.unwrap_err();
        assert!(matches!(err, ControlError::Gate(GateError::NotConfigured)));
        assert_eq!(api.calls(START_PATH), 0);

        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.level, NoticeLevel::Failure);
        assert_eq!(notice.message, "Please enter and save the configuration details first!");
    }

    #[tokio::test]
    async fn test_failed_save_keeps_unconfigured() {
        let (controller, api, mut notices) = controller();
        api.set_failing(true);
        fill_form(&controller, ["1000", "1500", "2000", "500"]);

        assert!(matches!(controller.submit().await, Err(ControlError::Network(_))));
        assert_eq!(controller.gate().lock().state(), ControlState::Unconfigured);
        assert!(!controller.form().is_submitting());
        assert_eq!(notices.recv().await.unwrap().message, "Failed to save configuration");
    }

    #[tokio::test]
    async fn test_start_stop_round_trip() {
        let (controller, _api, mut notices) = controller();
        fill_form(&controller, ["1000", "1500", "2000", "500"]);
        controller.submit().await.unwrap();
        notices.recv().await.unwrap();

        assert_eq!(controller.start().await.unwrap(), ControlState::Running);
        assert_eq!(notices.recv().await.unwrap().message, "System started successfully!");

        assert_eq!(controller.stop().await.unwrap(), ControlState::Stopped);
        assert_eq!(notices.recv().await.unwrap().message, "System stopped successfully!");
    }

    #[tokio::test]
    async fn test_failed_start_leaves_state() {
        let (controller, api, mut notices) = controller();
        fill_form(&controller, ["1000", "1500", "2000", "500"]);
        controller.submit().await.unwrap();
        notices.recv().await.unwrap();

        api.set_failing(true);
        assert!(controller.start().await.is_err());
        let gate = controller.gate().lock();
        assert_eq!(gate.state(), ControlState::Configured);
        assert!(gate.can_start());
        drop(gate);

        let notice = notices.recv().await.unwrap();
        assert!(notice.message.starts_with("Error starting system: "));
    }

    #[tokio::test]
    async fn test_view_routes_topics_and_tears_down() {
        let (stream, transport_log, inbound) = stream();
        let api = Arc::new(FakeTicketApi::default());
        let metrics = Arc::new(Metrics::new());
        let mut view =
            DashboardView::mount(api.clone(), ControlGate::shared(), &stream, &settings(), metrics.clone());
        settle().await;

        let send = |topic: &str, body: &str| {
            inbound
                .send(Some(InboundMessage { topic: topic.to_string(), body: body.to_string() }))
                .unwrap();
        };
        send(LOG_TOPIC, "Vendor-1 added 5 tickets");
        send(LOG_TOPIC, "Vendor-1 added 5 tickets ");
        send(AVAILABILITY_TOPIC, r#"{"totalTickets": 200, "availableTickets": 150}"#);
        send(AVAILABILITY_TOPIC, r#"{"totalTickets": 200, "availableTickets": 150}"#);
        send(AVAILABILITY_TOPIC, "garbage");
        settle().await;

        assert_eq!(view.log().lock().len(), 1);
        assert_eq!(view.availability().snapshot().progress_percent(), 75);
        assert_eq!(view.availability().change_count(), 1);
        let summary = metrics.report();
        assert_eq!(summary.log_duplicates, 1);
        assert_eq!(summary.metric_unchanged, 1);
        assert_eq!(summary.protocol_errors, 1);
        assert_eq!(api.calls(STATUS_PATH), 1);

        view.teardown();
        view.teardown();
        settle().await;
        assert!(!view.is_mounted());
        assert_eq!(stream.subscriber_count(LOG_TOPIC), 0);
        assert_eq!(stream.subscriber_count(AVAILABILITY_TOPIC), 0);
        let log = transport_log.lock();
        assert!(log.contains(&format!("unsubscribe {LOG_TOPIC}")));
        assert!(log.contains(&format!("unsubscribe {AVAILABILITY_TOPIC}")));
    }
}
