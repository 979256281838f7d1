//! Request and context pool counters

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every route of an application
#[derive(Debug, Default)]
pub struct Metrics {
    requests_served: AtomicU64,
    handler_failures: AtomicU64,
    pool_hits: AtomicU64,
    pool_misses: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_served(&self) {
        self.requests_served.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "requests_served", "Metric incremented");
    }

    pub fn handler_failed(&self) {
        self.handler_failures.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "handler_failures", "Metric incremented");
    }

    pub fn pool_hit(&self) {
        self.pool_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pool_miss(&self) {
        self.pool_misses.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(counter = "pool_misses", "Metric incremented");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_served: self.requests_served.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            pool_hits: self.pool_hits.load(Ordering::Relaxed),
            pool_misses: self.pool_misses.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_served: u64,
    pub handler_failures: u64,
    pub pool_hits: u64,
    pub pool_misses: u64,
}
