use std::sync::atomic::{AtomicUsize, Ordering};

/// Dispatcher counters for monitoring.
#[derive(Debug, Default)]
pub struct DispatcherMetrics {
    pub queued: AtomicUsize,
    pub in_flight: AtomicUsize,
    pub executed: AtomicUsize,
    pub failed: AtomicUsize,
    pub retried: AtomicUsize,
}

impl DispatcherMetrics {
    pub fn record_success(&self) {
        self.executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retried.fetch_add(1, Ordering::Relaxed);
    }

    /// Terminal outcomes so far, successful and failed.
    pub fn total_completed(&self) -> usize {
        self.executed.load(Ordering::Relaxed) + self.failed.load(Ordering::Relaxed)
    }

    /// Share of terminal outcomes that succeeded, as a percentage.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_completed();
        if total == 0 {
            100.0
        } else {
            let ok = self.executed.load(Ordering::Relaxed);
            (ok as f64 / total as f64) * 100.0
        }
    }
}

/// Batch aggregator counters.
#[derive(Debug, Default)]
pub struct BatcherMetrics {
    pub pending: AtomicUsize,
    pub flushes: AtomicUsize,
    pub fragments_resolved: AtomicUsize,
    pub fragments_rejected: AtomicUsize,
}

impl BatcherMetrics {
    pub fn record_flush(&self, resolved: usize, rejected: usize) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        self.fragments_resolved.fetch_add(resolved, Ordering::Relaxed);
        self.fragments_rejected.fetch_add(rejected, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_rate_ignores_empty_history() {
        let metrics = DispatcherMetrics::default();
        assert_eq!(metrics.success_rate(), 100.0);
        metrics.record_success();
        metrics.record_failure();
        assert_eq!(metrics.success_rate(), 50.0);
    }
}
