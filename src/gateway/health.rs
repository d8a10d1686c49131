use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::gateway::ring::AdapterRing;

/// Snapshot of the last health probe. Observability only: an unhealthy
/// backend never gates the dispatcher or the batcher.
#[derive(Clone, Debug)]
pub struct HealthStatus {
    pub healthy: bool,
    pub last_check: Option<Instant>,
    pub consecutive_failures: u32,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            healthy: true,
            last_check: None,
            consecutive_failures: 0,
        }
    }
}

/// Periodically exercises the adapter with a cheap read and records the
/// outcome.
pub struct HealthMonitor {
    ring: Arc<AdapterRing>,
    period: Duration,
    status: Arc<RwLock<HealthStatus>>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HealthMonitor {
    pub fn new(ring: Arc<AdapterRing>, period: Duration) -> Self {
        Self {
            ring,
            period,
            status: Arc::new(RwLock::new(HealthStatus::default())),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    pub fn start(&self) {
        let mut task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return;
        }
        let ring = self.ring.clone();
        let period = self.period;
        let status = self.status.clone();
        let shutdown = self.shutdown.clone();
        *task = Some(tokio::spawn(async move {
            // First probe after one full period, like a re-armed timer.
            let mut tick = interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tick.tick() => probe(&ring, &status).await,
                }
            }
        }));
    }

    /// Cancel the probe timer so the handle cannot outlive the gateway.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn status(&self) -> HealthStatus {
        self.status
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

async fn probe(ring: &AdapterRing, status: &RwLock<HealthStatus>) {
    let result = ring
        .next()
        .from_table("health_check")
        .select(&["id"])
        .limit(1)
        .run()
        .await;

    let mut status = status
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    status.last_check = Some(Instant::now());
    match result {
        Ok(_) => {
            info!("backend connection healthy");
            status.healthy = true;
            status.consecutive_failures = 0;
        }
        Err(err) => {
            status.healthy = false;
            status.consecutive_failures += 1;
            warn!(%err, failures = status.consecutive_failures, "backend health check failed");
        }
    }
}
