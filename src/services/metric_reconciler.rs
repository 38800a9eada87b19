//! Latest ticket availability snapshot
//!
//! Each availability message replaces the held snapshot wholesale, but only when
//! a field differs; identical messages do not notify watchers.

use crate::domain::TicketSnapshot;
use crate::io::stream::ProtocolError;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;
use tracing::debug;

pub struct MetricReconciler {
    tx: watch::Sender<TicketSnapshot>,
    changes: AtomicU64,
}

impl MetricReconciler {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(TicketSnapshot::default());
        Self { tx, changes: AtomicU64::new(0) }
    }

    pub fn snapshot(&self) -> TicketSnapshot {
        *self.tx.borrow()
    }

    /// Receiver notified once per actual snapshot change
    pub fn watch(&self) -> watch::Receiver<TicketSnapshot> {
        self.tx.subscribe()
    }

    /// Number of snapshot replacements so far
    pub fn change_count(&self) -> u64 {
        self.changes.load(Ordering::Relaxed)
    }

    /// Parse `{"totalTickets": n, "availableTickets": m}` and apply it.
    ///
    /// Returns whether the held snapshot changed.
    pub fn ingest(&self, topic: &str, raw: &str) -> Result<bool, ProtocolError> {
        let snapshot: TicketSnapshot =
            serde_json::from_str(raw.trim()).map_err(|e| ProtocolError::InvalidPayload {
                topic: topic.to_string(),
                reason: e.to_string(),
            })?;
        Ok(self.apply(snapshot))
    }

    /// Replace the held snapshot if it differs
    pub fn apply(&self, snapshot: TicketSnapshot) -> bool {
        let changed = self.tx.send_if_modified(|held| {
            if *held == snapshot {
                return false;
            }
            *held = snapshot;
            true
        });
        if changed {
            self.changes.fetch_add(1, Ordering::Relaxed);
            debug!(
                total = %snapshot.total_tickets,
                available = %snapshot.available_tickets,
                "ticket_snapshot_changed"
            );
        }
        changed
    }
}

impl Default for MetricReconciler {
    fn default() -> Self {
        Self::new()
    }
}
