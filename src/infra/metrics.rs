//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics so that stream handlers, the status poller and the UI loop can
//! record without sharing a lock.
//!
//! NOTE: All atomics use Relaxed ordering intentionally—these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Lock-free dashboard metrics
pub struct Metrics {
    started_at: Instant,
    status_polls: AtomicU64,
    status_poll_failures: AtomicU64,
    stale_observations: AtomicU64,
    log_received: AtomicU64,
    log_appended: AtomicU64,
    log_duplicates: AtomicU64,
    log_empty: AtomicU64,
    log_evicted: AtomicU64,
    metric_received: AtomicU64,
    metric_changed: AtomicU64,
    metric_unchanged: AtomicU64,
    protocol_errors: AtomicU64,
    stream_connects: AtomicU64,
    stream_disconnects: AtomicU64,
    subscriber_drops: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            status_polls: AtomicU64::new(0),
            status_poll_failures: AtomicU64::new(0),
            stale_observations: AtomicU64::new(0),
            log_received: AtomicU64::new(0),
            log_appended: AtomicU64::new(0),
            log_duplicates: AtomicU64::new(0),
            log_empty: AtomicU64::new(0),
            log_evicted: AtomicU64::new(0),
            metric_received: AtomicU64::new(0),
            metric_changed: AtomicU64::new(0),
            metric_unchanged: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            stream_connects: AtomicU64::new(0),
            stream_disconnects: AtomicU64::new(0),
            subscriber_drops: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn record_status_poll(&self, ok: bool) {
        self.status_polls.fetch_add(1, Ordering::Relaxed);
        if !ok {
            self.status_poll_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_stale_observation(&self) {
        self.stale_observations.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_log_received(&self) {
        self.log_received.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_log_appended(&self, evicted: u64) {
        self.log_appended.fetch_add(1, Ordering::Relaxed);
        if evicted > 0 {
            self.log_evicted.fetch_add(evicted, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_log_duplicate(&self) {
        self.log_duplicates.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_log_empty(&self) {
        self.log_empty.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_metric(&self, changed: bool) {
        self.metric_received.fetch_add(1, Ordering::Relaxed);
        if changed {
            self.metric_changed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.metric_unchanged.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stream_connected(&self) {
        self.stream_connects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stream_disconnected(&self) {
        self.stream_disconnects.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_subscriber_drop(&self) {
        self.subscriber_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters
    pub fn report(&self) -> MetricsSummary {
        MetricsSummary {
            uptime_secs: self.started_at.elapsed().as_secs(),
            status_polls: self.status_polls.load(Ordering::Relaxed),
            status_poll_failures: self.status_poll_failures.load(Ordering::Relaxed),
            stale_observations: self.stale_observations.load(Ordering::Relaxed),
            log_received: self.log_received.load(Ordering::Relaxed),
            log_appended: self.log_appended.load(Ordering::Relaxed),
            log_duplicates: self.log_duplicates.load(Ordering::Relaxed),
            log_empty: self.log_empty.load(Ordering::Relaxed),
            log_evicted: self.log_evicted.load(Ordering::Relaxed),
            metric_received: self.metric_received.load(Ordering::Relaxed),
            metric_changed: self.metric_changed.load(Ordering::Relaxed),
            metric_unchanged: self.metric_unchanged.load(Ordering::Relaxed),
            protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
            stream_connects: self.stream_connects.load(Ordering::Relaxed),
            stream_disconnects: self.stream_disconnects.load(Ordering::Relaxed),
            subscriber_drops: self.subscriber_drops.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the dashboard counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSummary {
    pub uptime_secs: u64,
    pub status_polls: u64,
    pub status_poll_failures: u64,
    pub stale_observations: u64,
    pub log_received: u64,
    pub log_appended: u64,
    pub log_duplicates: u64,
    pub log_empty: u64,
    pub log_evicted: u64,
    pub metric_received: u64,
    pub metric_changed: u64,
    pub metric_unchanged: u64,
    pub protocol_errors: u64,
    pub stream_connects: u64,
    pub stream_disconnects: u64,
    pub subscriber_drops: u64,
}

impl MetricsSummary {
    /// Emit the summary as one structured event
    pub fn log(&self) {
        info!(
            uptime_secs = %self.uptime_secs,
            status_polls = %self.status_polls,
            status_poll_failures = %self.status_poll_failures,
            stale_observations = %self.stale_observations,
            log_received = %self.log_received,
            log_appended = %self.log_appended,
            log_duplicates = %self.log_duplicates,
            log_evicted = %self.log_evicted,
            metric_received = %self.metric_received,
            metric_unchanged = %self.metric_unchanged,
            protocol_errors = %self.protocol_errors,
            stream_connects = %self.stream_connects,
            stream_disconnects = %self.stream_disconnects,
            subscriber_drops = %self.subscriber_drops,
            "metrics_report"
        );
    }
}
