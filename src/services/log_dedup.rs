//! Duplicate-suppressed system log
//!
//! Lines arrive either as plain text or as `{"id": <u64>, "message": "<text>"}`.
//! Identified lines deduplicate on `id`; plain lines deduplicate on their
//! trimmed text, so identical plain lines collapse into one entry.
//!
//! By default the log keeps every line. With `max_entries` set it becomes a ring
//! buffer: once the cap is reached the oldest entry is evicted and its key
//! leaves the seen set.

use crate::domain::{epoch_ms, LogEntry, LogKey};
use crate::infra::metrics::Metrics;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;

pub type SharedLog = Arc<Mutex<LogDeduplicator>>;

#[derive(Debug, Deserialize)]
struct LogEnvelope {
    id: u64,
    message: String,
}

/// Result of ingesting one raw message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutcome {
    Appended { evicted: usize },
    Duplicate,
    Empty,
}

impl LogOutcome {
    pub fn record(&self, metrics: &Metrics) {
        metrics.record_log_received();
        match self {
            LogOutcome::Appended { evicted } => metrics.record_log_appended(*evicted as u64),
            LogOutcome::Duplicate => metrics.record_log_duplicate(),
            LogOutcome::Empty => metrics.record_log_empty(),
        }
    }
}

/// Key and display text for a raw message; `None` if there is nothing to show
pub fn parse_line(raw: &str) -> Option<(LogKey, String)> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    if trimmed.starts_with('{') {
        if let Ok(envelope) = serde_json::from_str::<LogEnvelope>(trimmed) {
            let text = envelope.message.trim();
            if text.is_empty() {
                return None;
            }
            return Some((LogKey::Id(envelope.id), text.to_string()));
        }
    }

    Some((LogKey::Text(trimmed.to_string()), trimmed.to_string()))
}

#[derive(Debug)]
pub struct LogDeduplicator {
    entries: VecDeque<LogEntry>,
    seen: FxHashSet<LogKey>,
    max_entries: Option<usize>,
    revision: u64,
}

impl LogDeduplicator {
    /// `None` or `Some(0)` keeps every entry
    pub fn new(max_entries: Option<usize>) -> Self {
        Self {
            entries: VecDeque::new(),
            seen: FxHashSet::default(),
            max_entries: max_entries.filter(|n| *n > 0),
            revision: 0,
        }
    }

    pub fn shared(max_entries: Option<usize>) -> SharedLog {
        Arc::new(Mutex::new(Self::new(max_entries)))
    }

    pub fn ingest(&mut self, raw: &str) -> LogOutcome {
        let Some((key, text)) = parse_line(raw) else {
            return LogOutcome::Empty;
        };
        if self.seen.contains(&key) {
            return LogOutcome::Duplicate;
        }

        let mut evicted = 0;
        if let Some(max) = self.max_entries {
            while self.entries.len() >= max {
                if let Some(oldest) = self.entries.pop_front() {
                    self.seen.remove(&oldest.key);
                    evicted += 1;
                }
            }
        }

        self.seen.insert(key.clone());
        self.entries.push_back(LogEntry { key, text, received_ms: epoch_ms() });
        self.revision += 1;
        LogOutcome::Appended { evicted }
    }

    /// Entries oldest first
    pub fn entries(&self) -> impl DoubleEndedIterator<Item = &LogEntry> + ExactSizeIterator {
        self.entries.iter()
    }

    /// The newest `n` entries, oldest first
    pub fn tail(&self, n: usize) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().skip(self.entries.len().saturating_sub(n))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bumped on every append; lets a renderer skip unchanged frames
    pub fn revision(&self) -> u64 {
        self.revision
    }
}

impl Default for LogDeduplicator {
    fn default() -> Self {
        Self::new(None)
    }
}
