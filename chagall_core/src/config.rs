use std::time::Duration;

/// Gateway configuration.
///
/// All knobs the runtime hard-codes in the background loops live here so the
/// composition root (and tests) can shrink timers and caps.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Maximum number of queued operations executing at once.
    pub max_concurrent_requests: usize,
    /// Minimum spacing between two dispatches, independent of concurrency.
    pub rate_limit_delay: Duration,
    /// Poll interval while the concurrency cap is saturated.
    pub saturation_poll: Duration,
    /// Idle sleep when the request queue is empty.
    pub idle_sleep: Duration,
    /// Maximum fragments drained per batch flush.
    pub batch_size: usize,
    /// Interval between batch flushes.
    pub batch_timeout: Duration,
    /// Upper bound on fragments waiting for a flush. Excess submissions are
    /// rejected with [`GatewayError::BatchFull`](crate::GatewayError::BatchFull).
    pub max_pending_batches: usize,
    /// Number of adapter handles in the round-robin ring.
    pub max_pool_size: usize,
    /// Interval between health-check probes.
    pub health_check_interval: Duration,
    /// Default retry budget for queued operations.
    pub default_retries: u32,
    /// Base unit for exponential backoff between retries.
    pub backoff_base: Duration,
    /// Per-attempt deadline for queued operations. `None` disables it.
    pub operation_timeout: Option<Duration>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 5,
            rate_limit_delay: Duration::from_millis(100),
            saturation_poll: Duration::from_millis(50),
            idle_sleep: Duration::from_millis(100),
            batch_size: 10,
            batch_timeout: Duration::from_millis(100),
            max_pending_batches: 1024,
            max_pool_size: 3,
            health_check_interval: Duration::from_secs(30),
            default_retries: 3,
            backoff_base: Duration::from_secs(1),
            operation_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl GatewayConfig {
    /// Backoff before the retry that leaves `retries_left` budget remaining.
    ///
    /// Delays grow as the budget is consumed: for the default budget of 3 the
    /// sequence is 2s, 4s, 8s for `retries_left` of 2, 1, 0.
    pub fn backoff_delay(&self, retries_left: u32) -> Duration {
        let exponent = self.default_retries.saturating_sub(retries_left);
        self.backoff_base * 2u32.saturating_pow(exponent)
    }
}
