//! Services - dashboard business logic
//!
//! - `config_form` - Configuration validator and editable form
//! - `control_gate` - Start/stop authorization state machine
//! - `status_reconciler` - Periodic status poll feeding the gate
//! - `log_dedup` - Duplicate-suppressed bounded system log
//! - `metric_reconciler` - Latest ticket availability snapshot
//! - `dashboard` - Operator actions and view lifetime

pub mod config_form;
pub mod control_gate;
pub mod dashboard;
pub mod log_dedup;
pub mod metric_reconciler;
pub mod status_reconciler;

// Re-export commonly used types
pub use config_form::{validate, ConfigForm, ValidationError};
pub use control_gate::{ControlGate, GateAction, GateError, ObservationTicket, SharedGate};
pub use dashboard::{ControlError, DashboardController, DashboardView, Notice, NoticeLevel, ViewSettings};
pub use log_dedup::{LogDeduplicator, LogOutcome, SharedLog};
pub use metric_reconciler::MetricReconciler;
pub use status_reconciler::{poll_once, PollOutcome, StatusReconciler};
