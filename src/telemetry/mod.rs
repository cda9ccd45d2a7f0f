//! Telemetry for the completion bridge.
//!
//! With the `telemetry` feature the bridge counts every completion and keeps
//! a histogram of trampoline-to-delivery latency. Without it the same API is
//! a set of no-ops.

#[cfg(feature = "telemetry")]
pub mod metrics;

#[cfg(feature = "telemetry")]
pub use metrics::{Metrics, MetricsSnapshot};

// Stub implementations when telemetry is disabled
#[cfg(not(feature = "telemetry"))]
pub mod metrics {
    use std::time::{Duration, Instant};

    #[derive(Debug, Clone, Default)]
    pub struct Metrics;

    impl Metrics {
        pub fn new() -> Self { Self }
        pub fn record_enqueued(&self) {}
        pub fn record_delivered(&self, _: Duration) {}
        pub fn record_dropped(&self, _: u64) {}
        pub fn record_callback_panic(&self) {}
        pub fn record_sync_failure(&self) {}
        pub fn snapshot(&self) -> MetricsSnapshot { MetricsSnapshot::default() }
        pub fn reset(&self) {}
    }

    #[derive(Debug, Clone, Default)]
    pub struct MetricsSnapshot {
        pub timestamp: Option<Instant>,
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
}

#[cfg(not(feature = "telemetry"))]
pub use metrics::{Metrics, MetricsSnapshot};
