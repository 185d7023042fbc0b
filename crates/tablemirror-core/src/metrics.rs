//! Engine metrics.
//!
//! One [`SyncMetrics`] instance is owned by the service and shared by
//! the poller, agents, and caches. Counters are relaxed atomics;
//! [`SyncMetrics::snapshot`] clones them out for reporting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters maintained across the whole engine.
#[derive(Debug, Default)]
pub struct SyncMetrics {
    /// Completed poll cycles that observed at least one change event.
    pub poll_cycles_total: AtomicU64,
    /// Poll cycles abandoned because the change log read failed.
    pub poll_errors_total: AtomicU64,
    /// Change-log events read.
    pub events_total: AtomicU64,
    /// Change batches fully applied to a table's caches.
    pub batches_total: AtomicU64,
    /// Rows loaded for dispatches.
    pub rows_loaded_total: AtomicU64,
    /// Dispatches abandoned because a bulk row load failed.
    pub load_errors_total: AtomicU64,
    /// Ids that vanished between event capture and the load, delivered
    /// as deleted.
    pub vanished_rows_total: AtomicU64,
    /// Listener callbacks that panicked and were isolated.
    pub listener_panics_total: AtomicU64,
    /// Full-table snapshot rebuilds after a cache miss.
    pub snapshot_rebuilds_total: AtomicU64,
}

impl SyncMetrics {
    /// Creates a zeroed metrics instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed poll cycle and the events it read.
    pub fn record_cycle(&self, events: u64) {
        self.poll_cycles_total.fetch_add(1, Ordering::Relaxed);
        self.events_total.fetch_add(events, Ordering::Relaxed);
    }

    /// Records an abandoned poll cycle.
    pub fn record_poll_error(&self) {
        self.poll_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a fully applied batch and the rows loaded for it.
    pub fn record_batch(&self, rows_loaded: u64) {
        self.batches_total.fetch_add(1, Ordering::Relaxed);
        self.rows_loaded_total
            .fetch_add(rows_loaded, Ordering::Relaxed);
    }

    /// Records an abandoned dispatch.
    pub fn record_load_error(&self) {
        self.load_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records ids that could not be loaded and were delivered deleted.
    pub fn record_vanished(&self, count: u64) {
        self.vanished_rows_total.fetch_add(count, Ordering::Relaxed);
    }

    /// Records an isolated listener panic.
    pub fn record_listener_panic(&self) {
        self.listener_panics_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a full-table snapshot rebuild.
    pub fn record_snapshot_rebuild(&self) {
        self.snapshot_rebuilds_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of all counters.
    #[must_use]
    pub fn snapshot(&self) -> SyncMetricsSnapshot {
        SyncMetricsSnapshot {
            poll_cycles_total: self.poll_cycles_total.load(Ordering::Relaxed),
            poll_errors_total: self.poll_errors_total.load(Ordering::Relaxed),
            events_total: self.events_total.load(Ordering::Relaxed),
            batches_total: self.batches_total.load(Ordering::Relaxed),
            rows_loaded_total: self.rows_loaded_total.load(Ordering::Relaxed),
            load_errors_total: self.load_errors_total.load(Ordering::Relaxed),
            vanished_rows_total: self.vanished_rows_total.load(Ordering::Relaxed),
            listener_panics_total: self.listener_panics_total.load(Ordering::Relaxed),
            snapshot_rebuilds_total: self.snapshot_rebuilds_total.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time snapshot of [`SyncMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncMetricsSnapshot {
    /// Completed poll cycles.
    pub poll_cycles_total: u64,
    /// Abandoned poll cycles.
    pub poll_errors_total: u64,
    /// Change-log events read.
    pub events_total: u64,
    /// Batches fully applied.
    pub batches_total: u64,
    /// Rows loaded.
    pub rows_loaded_total: u64,
    /// Abandoned dispatches.
    pub load_errors_total: u64,
    /// Ids delivered deleted after failing to load.
    pub vanished_rows_total: u64,
    /// Isolated listener panics.
    pub listener_panics_total: u64,
    /// Snapshot rebuilds.
    pub snapshot_rebuilds_total: u64,
}
