//! Delivery counters for the in-memory bus.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Metrics for bus delivery monitoring.
#[derive(Debug, Default)]
pub struct BusMetrics {
    /// Number of publish calls.
    published: AtomicU64,
    /// Number of handler invocations that returned `Ok`.
    delivered: AtomicU64,
    /// Number of handler invocations that errored or panicked.
    failed: AtomicU64,
    /// Number of publishes that found no subscriber.
    unrouted: AtomicU64,
    /// Last failure time.
    last_failure_time: RwLock<Option<Instant>>,
}

impl BusMetrics {
    /// Records a publish.
    pub fn record_publish(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful delivery.
    pub fn record_delivery(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a failed delivery.
    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        *self.last_failure_time.write() = Some(Instant::now());
    }

    /// Records a publish with no subscriber.
    pub fn record_unrouted(&self) {
        self.unrouted.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of publishes.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Returns the number of successful deliveries.
    #[must_use]
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Returns the number of failed deliveries.
    #[must_use]
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Returns the number of unrouted publishes.
    #[must_use]
    pub fn unrouted(&self) -> u64 {
        self.unrouted.load(Ordering::Relaxed)
    }

    /// Returns the time of the last failed delivery.
    #[must_use]
    pub fn last_failure_time(&self) -> Option<Instant> {
        *self.last_failure_time.read()
    }

    /// Converts metrics to a dictionary.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::json!({
            "published": self.published(),
            "delivered": self.delivered(),
            "failed": self.failed(),
            "unrouted": self.unrouted(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_default() {
        let metrics = BusMetrics::default();
        assert_eq!(metrics.published(), 0);
        assert_eq!(metrics.failed(), 0);
        assert!(metrics.last_failure_time().is_none());
    }

    #[test]
    fn test_metrics_recording() {
        let metrics = BusMetrics::default();
        metrics.record_publish();
        metrics.record_delivery();
        metrics.record_failure();
        metrics.record_unrouted();

        let dict = metrics.to_dict();
        assert_eq!(dict["published"], 1);
        assert_eq!(dict["delivered"], 1);
        assert_eq!(dict["failed"], 1);
        assert_eq!(dict["unrouted"], 1);
        assert!(metrics.last_failure_time().is_some());
    }
}
