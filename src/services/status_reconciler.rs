//! Periodic status poll feeding the control gate
//!
//! Polls once immediately, then every interval. Polls run sequentially on one
//! task, so a slow response delays the next tick instead of overlapping it.
//! Failures keep the previously observed state.

use crate::domain::RemoteStatus;
use crate::infra::metrics::Metrics;
use crate::io::api::TicketApi;
use crate::services::control_gate::SharedGate;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Outcome of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Applied(RemoteStatus),
    Stale(RemoteStatus),
    Failed,
}

/// Issue one status request and apply the classified result to the gate
pub async fn poll_once(api: &dyn TicketApi, gate: &SharedGate, metrics: &Metrics) -> PollOutcome {
    let ticket = gate.lock().begin_observation();

    match api.status().await {
        Ok(body) => {
            metrics.record_status_poll(true);
            let status = RemoteStatus::classify(&body);
            if gate.lock().observe(ticket, status) {
                debug!(status = %status, seq = %ticket.seq(), "status_observed");
                PollOutcome::Applied(status)
            } else {
                metrics.record_stale_observation();
                PollOutcome::Stale(status)
            }
        }
        Err(e) => {
            metrics.record_status_poll(false);
            warn!(error = %e, "status_poll_failed");
            PollOutcome::Failed
        }
    }
}

/// Owns the poll task; dropping it cancels polling
pub struct StatusReconciler {
    task: Option<JoinHandle<()>>,
}

impl StatusReconciler {
    pub fn spawn(
        api: Arc<dyn TicketApi>,
        gate: SharedGate,
        interval: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_ms = %interval.as_millis(), "status_reconciler_started");

            loop {
                // First tick completes immediately
                ticker.tick().await;
                poll_once(api.as_ref(), &gate, &metrics).await;
            }
        });

        Self { task: Some(task) }
    }

    /// Stop polling. Returns true only for the call that actually cancelled.
    pub fn cancel(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.abort();
                info!("status_reconciler_cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for StatusReconciler {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ControlState;
    use crate::io::api::fake::FakeTicketApi;
    use crate::io::api::STATUS_PATH;
    use crate::services::control_gate::ControlGate;

    const INTERVAL: Duration = Duration::from_millis(2000);

    #[tokio::test]
    async fn test_poll_classifies_running() {
        let api = FakeTicketApi::default();
        api.set_running(true);
        let gate = ControlGate::shared();
        let metrics = Metrics::new();

        let outcome = poll_once(&api, &gate, &metrics).await;
        assert_eq!(outcome, PollOutcome::Applied(RemoteStatus::Running));
        assert_eq!(gate.lock().state(), ControlState::Running);
    }

    #[tokio::test]
    async fn test_failed_poll_retains_state() {
        let api = FakeTicketApi::default();
        api.set_running(true);
        let gate = ControlGate::shared();
        let metrics = Metrics::new();
        poll_once(&api, &gate, &metrics).await;

        api.set_failing(true);
        assert_eq!(poll_once(&api, &gate, &metrics).await, PollOutcome::Failed);
        assert_eq!(gate.lock().state(), ControlState::Running);
        assert_eq!(metrics.report().status_poll_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_immediately_then_on_interval() {
        let api = Arc::new(FakeTicketApi::default());
        let gate = ControlGate::shared();
        let metrics = Arc::new(Metrics::new());

        let _reconciler = StatusReconciler::spawn(api.clone(), gate, INTERVAL, metrics);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(api.calls(STATUS_PATH), 1);

        tokio::time::sleep(Duration::from_millis(4000)).await;
        assert_eq!(api.calls(STATUS_PATH), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_polls_after_cancel() {
        let api = Arc::new(FakeTicketApi::default());
        let gate = ControlGate::shared();
        let metrics = Arc::new(Metrics::new());

        let mut reconciler = StatusReconciler::spawn(api.clone(), gate, INTERVAL, metrics);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(reconciler.is_active());

        assert!(reconciler.cancel());
        assert!(!reconciler.cancel());
        assert!(!reconciler.is_active());

        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(api.calls(STATUS_PATH), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_polling() {
        let api = Arc::new(FakeTicketApi::default());
        let reconciler = StatusReconciler::spawn(
            api.clone(),
            ControlGate::shared(),
            INTERVAL,
            Arc::new(Metrics::new()),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(reconciler);

        tokio::time::sleep(INTERVAL * 3).await;
        assert_eq!(api.calls(STATUS_PATH), 1);
    }
}
