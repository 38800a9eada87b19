//! Shared types for the ticket dashboard

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current epoch milliseconds
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// One of the four operator-editable configuration fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigField {
    TotalTickets,
    TicketReleaseRate,
    CustomerRetrievalRate,
    MaxTicketCapacity,
}

impl ConfigField {
    /// Fields in form order
    pub const ALL: [ConfigField; 4] = [
        ConfigField::TotalTickets,
        ConfigField::TicketReleaseRate,
        ConfigField::CustomerRetrievalRate,
        ConfigField::MaxTicketCapacity,
    ];

    pub fn index(self) -> usize {
        match self {
            ConfigField::TotalTickets => 0,
            ConfigField::TicketReleaseRate => 1,
            ConfigField::CustomerRetrievalRate => 2,
            ConfigField::MaxTicketCapacity => 3,
        }
    }

    /// Human-readable label used in forms and error messages
    pub fn label(self) -> &'static str {
        match self {
            ConfigField::TotalTickets => "Total Tickets",
            ConfigField::TicketReleaseRate => "Ticket Release Rate (ms)",
            ConfigField::CustomerRetrievalRate => "Customer Retrieval Rate (ms)",
            ConfigField::MaxTicketCapacity => "Max Ticket Capacity",
        }
    }

    /// Wire name in the configure request body
    pub fn json_key(self) -> &'static str {
        match self {
            ConfigField::TotalTickets => "totalTickets",
            ConfigField::TicketReleaseRate => "ticketReleaseRate",
            ConfigField::CustomerRetrievalRate => "customerRetrievalRate",
            ConfigField::MaxTicketCapacity => "maxTicketCapacity",
        }
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.json_key())
    }
}

/// Validated simulation parameters
///
/// Only constructed by the configuration validator, so every value held by the
/// control gate satisfies: release and retrieval rates above 1000 ms and
/// max capacity not exceeding total tickets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Configuration {
    total_tickets: u64,
    ticket_release_rate: u64,
    customer_retrieval_rate: u64,
    max_ticket_capacity: u64,
}

impl Configuration {
    pub(crate) fn new(
        total_tickets: u64,
        ticket_release_rate: u64,
        customer_retrieval_rate: u64,
        max_ticket_capacity: u64,
    ) -> Self {
        Self { total_tickets, ticket_release_rate, customer_retrieval_rate, max_ticket_capacity }
    }

    pub fn total_tickets(&self) -> u64 {
        self.total_tickets
    }

    pub fn ticket_release_rate(&self) -> u64 {
        self.ticket_release_rate
    }

    pub fn customer_retrieval_rate(&self) -> u64 {
        self.customer_retrieval_rate
    }

    pub fn max_ticket_capacity(&self) -> u64 {
        self.max_ticket_capacity
    }

    pub fn value(&self, field: ConfigField) -> u64 {
        match field {
            ConfigField::TotalTickets => self.total_tickets,
            ConfigField::TicketReleaseRate => self.ticket_release_rate,
            ConfigField::CustomerRetrievalRate => self.customer_retrieval_rate,
            ConfigField::MaxTicketCapacity => self.max_ticket_capacity,
        }
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} release={}ms retrieval={}ms capacity={}",
            self.total_tickets,
            self.ticket_release_rate,
            self.customer_retrieval_rate,
            self.max_ticket_capacity
        )
    }
}

/// Control gate state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlState {
    #[default]
    Unconfigured,
    Configured,
    Running,
    Stopped,
}

impl ControlState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlState::Unconfigured => "unconfigured",
            ControlState::Configured => "configured",
            ControlState::Running => "running",
            ControlState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ControlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Remote simulation status as observed by a poll or a start/stop round trip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatus {
    Running,
    Stopped,
}

impl RemoteStatus {
    /// Classify a raw status response body.
    ///
    /// Anything containing the substring "running" is running; everything else,
    /// including unexpected text, is stopped.
    pub fn classify(body: &str) -> Self {
        if body.contains("running") {
            RemoteStatus::Running
        } else {
            RemoteStatus::Stopped
        }
    }
}

impl fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteStatus::Running => f.write_str("running"),
            RemoteStatus::Stopped => f.write_str("stopped"),
        }
    }
}

/// Ticket availability snapshot from the availability topic
///
/// `available_tickets <= total_tickets` is expected from the service but not enforced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketSnapshot {
    pub total_tickets: u64,
    pub available_tickets: u64,
}

impl TicketSnapshot {
    /// Available tickets as a rounded percentage of total; 0 when total is 0
    pub fn progress_percent(&self) -> u64 {
        if self.total_tickets == 0 {
            return 0;
        }
        (self.available_tickets as f64 / self.total_tickets as f64 * 100.0).round() as u64
    }
}

/// De-duplication key for a log line
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LogKey {
    /// Service-assigned monotonic message id
    Id(u64),
    /// Trimmed line text, for services that send plain lines
    Text(String),
}

/// A deduplicated log line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub key: LogKey,
    pub text: String,
    /// Local receive time (epoch ms)
    pub received_ms: u64,
}
