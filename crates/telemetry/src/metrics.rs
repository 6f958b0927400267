//! Internal metrics collection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// A counter metric.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_by(&self, n: u64) {
        self.0.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

/// A gauge metric (can go up or down).
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, val: u64) {
        self.0.store(val, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Collected metrics for the spout.
#[derive(Debug, Default)]
pub struct Metrics {
    // Virtual spout metrics
    pub messages_emitted: Counter,
    pub messages_acked: Counter,
    pub messages_failed: Counter,
    pub records_filtered: Counter,
    pub records_skipped_deserialize: Counter,
    pub ending_bound_skips: Counter,

    // State flush metrics
    pub state_flushes: Counter,
    pub flush_errors: Counter,

    // Broker metrics
    pub broker_errors: Counter,

    // Gauges
    pub running_spouts: Gauge,
    pub queue_depth: Gauge,
    pub in_flight: Gauge,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a snapshot of current metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            messages_emitted: self.messages_emitted.get(),
            messages_acked: self.messages_acked.get(),
            messages_failed: self.messages_failed.get(),
            records_filtered: self.records_filtered.get(),
            records_skipped_deserialize: self.records_skipped_deserialize.get(),
            ending_bound_skips: self.ending_bound_skips.get(),
            state_flushes: self.state_flushes.get(),
            flush_errors: self.flush_errors.get(),
            broker_errors: self.broker_errors.get(),
            running_spouts: self.running_spouts.get(),
            queue_depth: self.queue_depth.get(),
            in_flight: self.in_flight.get(),
        }
    }
}

/// A snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub messages_emitted: u64,
    pub messages_acked: u64,
    pub messages_failed: u64,
    pub records_filtered: u64,
    pub records_skipped_deserialize: u64,
    pub ending_bound_skips: u64,
    pub state_flushes: u64,
    pub flush_errors: u64,
    pub broker_errors: u64,
    pub running_spouts: u64,
    pub queue_depth: u64,
    pub in_flight: u64,
}

/// Global metrics registry.
pub static METRICS: std::sync::LazyLock<Metrics> = std::sync::LazyLock::new(Metrics::new);

/// Get the global metrics instance.
pub fn metrics() -> &'static Metrics {
    &METRICS
}
