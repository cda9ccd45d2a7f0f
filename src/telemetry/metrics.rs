//! Counters and latency histogram for the completion bridge.

use hdrhistogram::Histogram;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Bridge metrics collector.
///
/// Counters are bumped from native threads (enqueue) and from the host
/// thread (everything else), so all of them are atomics.
#[derive(Debug)]
pub struct Metrics {
    completions_enqueued: AtomicU64,
    completions_delivered: AtomicU64,
    completions_dropped: AtomicU64,
    callback_panics: AtomicU64,
    sync_failures: AtomicU64,

    // trampoline -> deliver, in nanoseconds
    delivery_latency: RwLock<Histogram<u64>>,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        // 3 significant figures, max one minute
        let histogram =
            Histogram::new_with_max(60_000_000_000, 3).expect("Failed to create histogram");

        Self {
            completions_enqueued: AtomicU64::new(0),
            completions_delivered: AtomicU64::new(0),
            completions_dropped: AtomicU64::new(0),
            callback_panics: AtomicU64::new(0),
            sync_failures: AtomicU64::new(0),
            delivery_latency: RwLock::new(histogram),
            start_time: Instant::now(),
        }
    }

    pub fn record_enqueued(&self) {
        self.completions_enqueued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delivered(&self, latency: Duration) {
        self.completions_delivered.fetch_add(1, Ordering::Relaxed);

        if let Some(mut hist) = self.delivery_latency.try_write() {
            let _ = hist.record(latency.as_nanos().min(u64::MAX as u128) as u64);
        }
    }

    pub fn record_dropped(&self, count: u64) {
        self.completions_dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_callback_panic(&self) {
        self.callback_panics.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sync_failure(&self) {
        self.sync_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let histogram = self.delivery_latency.read();

        MetricsSnapshot {
            timestamp: Instant::now(),
            uptime: self.start_time.elapsed(),
            completions_enqueued: self.completions_enqueued.load(Ordering::Relaxed),
            completions_delivered: self.completions_delivered.load(Ordering::Relaxed),
            completions_dropped: self.completions_dropped.load(Ordering::Relaxed),
            callback_panics: self.callback_panics.load(Ordering::Relaxed),
            sync_failures: self.sync_failures.load(Ordering::Relaxed),
            avg_latency_ns: if histogram.len() > 0 {
                histogram.mean() as u64
            } else {
                0
            },
            p50_latency_ns: histogram.value_at_quantile(0.50),
            p99_latency_ns: histogram.value_at_quantile(0.99),
            max_latency_ns: histogram.max(),
        }
    }

    pub fn reset(&self) {
        self.completions_enqueued.store(0, Ordering::Relaxed);
        self.completions_delivered.store(0, Ordering::Relaxed);
        self.completions_dropped.store(0, Ordering::Relaxed);
        self.callback_panics.store(0, Ordering::Relaxed);
        self.sync_failures.store(0, Ordering::Relaxed);

        if let Some(mut hist) = self.delivery_latency.try_write() {
            hist.reset();
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub timestamp: Instant,
    pub uptime: Duration,
    pub completions_enqueued: u64,
    pub completions_delivered: u64,
    pub completions_dropped: u64,
    pub callback_panics: u64,
    pub sync_failures: u64,
    pub avg_latency_ns: u64,
    pub p50_latency_ns: u64,
    pub p99_latency_ns: u64,
    pub max_latency_ns: u64,
}

impl MetricsSnapshot {
    /// Completions queued but not yet delivered or dropped.
    pub fn in_queue(&self) -> u64 {
        self.completions_enqueued
            .saturating_sub(self.completions_delivered + self.completions_dropped)
    }
}
