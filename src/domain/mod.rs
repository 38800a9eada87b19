//! Domain models - core dashboard types
//!
//! This module contains the canonical data types used throughout the dashboard:
//! - `Configuration` - validated simulation parameters
//! - `ConfigField` - the four operator-editable configuration fields
//! - `ControlState` - control gate state (unconfigured, configured, running, stopped)
//! - `RemoteStatus` - classified result of a status observation
//! - `TicketSnapshot` - latest ticket availability from the metric stream
//! - `LogEntry` - one deduplicated line from the log stream

pub mod types;

pub use types::{
    epoch_ms, ConfigField, Configuration, ControlState, LogEntry, LogKey, RemoteStatus,
    TicketSnapshot,
};
