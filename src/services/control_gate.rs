//! Control gate: authorizes start/stop from configuration and observed status
//!
//! State transitions:
//! - Unconfigured -> Configured on an accepted configuration
//! - Configured | Stopped -> Running on a successful start or a running observation
//! - Running -> Stopped on a successful stop or a stopped observation
//!
//! Every status source (poll, start, stop) draws an `ObservationTicket` before
//! issuing its request. A result is applied only if its ticket is newer than the
//! last applied one, so a slow poll cannot overwrite a later start or stop.

use crate::domain::{Configuration, ControlState, RemoteStatus};
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Gate shared between the dashboard controller and the status reconciler.
///
/// Never hold the lock across an await.
pub type SharedGate = Arc<Mutex<ControlGate>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateAction {
    Start,
    Stop,
}

impl fmt::Display for GateAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateAction::Start => f.write_str("start"),
            GateAction::Stop => f.write_str("stop"),
        }
    }
}

/// Local rejection of a start/stop; no request is issued
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GateError {
    #[error("Please enter and save the configuration details first!")]
    NotConfigured,

    #[error("System is already running.")]
    AlreadyRunning,

    #[error("System is not running.")]
    NotRunning,

    #[error("A {0} request is already in progress.")]
    InFlight(GateAction),
}

/// Position of a status result in request-issue order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ObservationTicket(u64);

impl ObservationTicket {
    pub fn seq(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Default)]
pub struct ControlGate {
    state: ControlState,
    configuration: Option<Configuration>,
    last_observed: Option<RemoteStatus>,
    next_seq: u64,
    applied_seq: u64,
    in_flight: Option<GateAction>,
}

impl ControlGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> SharedGate {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn configuration(&self) -> Option<&Configuration> {
        self.configuration.as_ref()
    }

    /// Latest applied remote status, from any source
    pub fn last_observed(&self) -> Option<RemoteStatus> {
        self.last_observed
    }

    pub fn in_flight(&self) -> Option<GateAction> {
        self.in_flight
    }

    /// Start control enabled; an unconfigured start is still rejected by `begin_start`
    pub fn can_start(&self) -> bool {
        self.state != ControlState::Running && self.in_flight.is_none()
    }

    pub fn can_stop(&self) -> bool {
        self.state == ControlState::Running && self.in_flight.is_none()
    }

    /// Record a configuration the service has persisted
    pub fn accept_configuration(&mut self, configuration: Configuration) -> ControlState {
        self.configuration = Some(configuration);
        if self.state == ControlState::Unconfigured {
            self.transition(ControlState::Configured);
        }
        self.state
    }

    /// Draw the next ticket; call before issuing the status request
    pub fn begin_observation(&mut self) -> ObservationTicket {
        self.next_seq += 1;
        ObservationTicket(self.next_seq)
    }

    /// Apply an observed remote status. Returns false for a stale ticket.
    pub fn observe(&mut self, ticket: ObservationTicket, status: RemoteStatus) -> bool {
        if ticket.0 <= self.applied_seq {
            debug!(seq = %ticket.0, applied = %self.applied_seq, "observation_stale");
            return false;
        }
        self.applied_seq = ticket.0;
        self.last_observed = Some(status);

        match (status, self.state) {
            (RemoteStatus::Running, ControlState::Running) => {}
            (RemoteStatus::Running, _) => self.transition(ControlState::Running),
            (RemoteStatus::Stopped, ControlState::Running) => {
                self.transition(ControlState::Stopped)
            }
            (RemoteStatus::Stopped, _) => {}
        }
        true
    }

    /// Authorize a start request and draw its ticket
    pub fn begin_start(&mut self) -> Result<ObservationTicket, GateError> {
        if let Some(action) = self.in_flight {
            return Err(GateError::InFlight(action));
        }
        if self.configuration.is_none() {
            return Err(GateError::NotConfigured);
        }
        if self.state == ControlState::Running {
            return Err(GateError::AlreadyRunning);
        }
        self.in_flight = Some(GateAction::Start);
        Ok(self.begin_observation())
    }

    /// Authorize a stop request and draw its ticket
    pub fn begin_stop(&mut self) -> Result<ObservationTicket, GateError> {
        if let Some(action) = self.in_flight {
            return Err(GateError::InFlight(action));
        }
        if self.state != ControlState::Running {
            return Err(GateError::NotRunning);
        }
        self.in_flight = Some(GateAction::Stop);
        Ok(self.begin_observation())
    }

    /// Apply a successful start/stop round trip. Returns false if a newer observation won.
    pub fn complete_action(&mut self, ticket: ObservationTicket) -> bool {
        let Some(action) = self.in_flight.take() else { return false };
        let status = match action {
            GateAction::Start => RemoteStatus::Running,
            GateAction::Stop => RemoteStatus::Stopped,
        };
        self.observe(ticket, status)
    }

    /// A start/stop request failed; state is left unchanged
    pub fn fail_action(&mut self) {
        self.in_flight = None;
    }

    fn transition(&mut self, to: ControlState) {
        info!(from = %self.state, to = %to, "control_state_changed");
        self.state = to;
    }
}
