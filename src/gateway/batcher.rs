use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use async_channel::{bounded, Receiver, Sender};
use chagall_core::{BatcherMetrics, GatewayConfig, GatewayError, GatewayResult};
use chagall_query::{ClientAdapter, Filter, Operation, QueryPlan};
use dashmap::DashMap;
use futures::future::{join_all, try_join_all};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::gateway::ring::AdapterRing;

/// One table-scoped query fragment waiting for the next flush.
struct BatchFragment {
    plan: QueryPlan,
    response_tx: Sender<GatewayResult<Value>>,
}

/// Time-windowed batch aggregator.
///
/// Callers append per-table query fragments; a timer-driven flush drains up
/// to `batch_size` fragments oldest-first, groups them by table, executes the
/// groups concurrently and settles each fragment's promise with its
/// positional result. The pending list is bounded: past
/// `max_pending_batches`, submissions fail fast with
/// [`GatewayError::BatchFull`] instead of growing memory.
pub struct Batcher {
    config: GatewayConfig,
    ring: Arc<AdapterRing>,
    pending: Arc<Mutex<VecDeque<BatchFragment>>>,
    metrics: Arc<BatcherMetrics>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Batcher {
    pub fn new(config: GatewayConfig, ring: Arc<AdapterRing>) -> Self {
        Self {
            config,
            ring,
            pending: Arc::new(Mutex::new(VecDeque::new())),
            metrics: Arc::new(BatcherMetrics::default()),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Spawn the flush loop. Idempotent while the loop is alive.
    pub fn start(&self) {
        let mut task = lock(&self.task);
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return;
        }
        let config = self.config.clone();
        let ring = self.ring.clone();
        let pending = self.pending.clone();
        let metrics = self.metrics.clone();
        let shutdown = self.shutdown.clone();
        *task = Some(tokio::spawn(run_loop(
            config, ring, pending, metrics, shutdown,
        )));
    }

    /// Cancel the flush loop, then drain and execute whatever is still
    /// pending so no caller is left hanging.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        flush_window(&self.ring, &self.pending, &self.metrics, usize::MAX).await;
    }

    /// Queue a select fragment for the next flush window.
    pub async fn select(&self, table: &str, filters: Vec<Filter>) -> GatewayResult<Value> {
        let mut plan = QueryPlan::new(table, Operation::Select);
        plan.filters = filters;
        self.settle(plan).await
    }

    /// Queue an insert fragment for the next flush window.
    pub async fn insert(&self, table: &str, data: Value) -> GatewayResult<Value> {
        let mut plan = QueryPlan::new(table, Operation::Insert);
        plan.payload = Some(data);
        self.settle(plan).await
    }

    /// Queue an update fragment for the next flush window.
    pub async fn update(
        &self,
        table: &str,
        data: Value,
        filters: Vec<Filter>,
    ) -> GatewayResult<Value> {
        let mut plan = QueryPlan::new(table, Operation::Update);
        plan.payload = Some(data);
        plan.filters = filters;
        self.settle(plan).await
    }

    /// Queue a delete fragment for the next flush window.
    pub async fn delete(&self, table: &str, filters: Vec<Filter>) -> GatewayResult<Value> {
        let mut plan = QueryPlan::new(table, Operation::Delete);
        plan.filters = filters;
        self.settle(plan).await
    }

    async fn settle(&self, plan: QueryPlan) -> GatewayResult<Value> {
        let rx = self.submit(plan)?;
        rx.recv().await.map_err(|_| GatewayError::ChannelClosed)?
    }

    /// Append a fragment without awaiting its result.
    pub(crate) fn submit(&self, plan: QueryPlan) -> GatewayResult<Receiver<GatewayResult<Value>>> {
        if self.shutdown.is_cancelled() {
            return Err(GatewayError::Shutdown);
        }
        let mut queue = lock(&self.pending);
        if queue.len() >= self.config.max_pending_batches {
            return Err(GatewayError::BatchFull);
        }
        let (response_tx, response_rx) = bounded(1);
        debug!(table = %plan.table, op = ?plan.op, "batch fragment queued");
        queue.push_back(BatchFragment { plan, response_tx });
        self.metrics.pending.store(queue.len(), Ordering::Relaxed);
        Ok(response_rx)
    }

    pub fn metrics(&self) -> Arc<BatcherMetrics> {
        self.metrics.clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_loop(
    config: GatewayConfig,
    ring: Arc<AdapterRing>,
    pending: Arc<Mutex<VecDeque<BatchFragment>>>,
    metrics: Arc<BatcherMetrics>,
    shutdown: CancellationToken,
) {
    let mut tick = interval(config.batch_timeout);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                flush_window(&ring, &pending, &metrics, usize::MAX).await;
                break;
            }
            _ = tick.tick() => {
                flush_window(&ring, &pending, &metrics, config.batch_size).await;
            }
        }
    }
}

/// One flush: drain up to `limit` fragments oldest-first, group by table,
/// fan out the groups and settle every fragment exactly once.
async fn flush_window(
    ring: &AdapterRing,
    pending: &Mutex<VecDeque<BatchFragment>>,
    metrics: &Arc<BatcherMetrics>,
    limit: usize,
) {
    let drained: Vec<BatchFragment> = {
        let mut queue = lock(pending);
        let take = limit.min(queue.len());
        let drained = queue.drain(..take).collect();
        metrics.pending.store(queue.len(), Ordering::Relaxed);
        drained
    };
    if drained.is_empty() {
        return;
    }

    let groups: DashMap<String, Vec<BatchFragment>> = DashMap::new();
    for fragment in drained {
        groups
            .entry(fragment.plan.table.clone())
            .or_default()
            .push(fragment);
    }

    let tasks: Vec<_> = groups
        .into_iter()
        .map(|(table, fragments)| run_group(ring.next(), table, fragments, metrics.clone()))
        .collect();
    join_all(tasks).await;
}

/// Execute one table group: fan out every fragment concurrently and join.
/// Positional pairing is preserved, so `results[i]` settles `fragments[i]`.
/// A failed join rejects the whole group with the same error; other groups
/// of the same flush are unaffected.
async fn run_group(
    adapter: ClientAdapter,
    table: String,
    fragments: Vec<BatchFragment>,
    metrics: Arc<BatcherMetrics>,
) {
    debug!(%table, fragments = fragments.len(), "flushing table group");
    let calls: Vec<_> = fragments
        .iter()
        .map(|fragment| {
            let adapter = adapter.clone();
            let plan = fragment.plan.clone();
            async move { adapter.execute(&plan).await }
        })
        .collect();

    match try_join_all(calls).await {
        Ok(results) => {
            let resolved = fragments.len();
            for (fragment, result) in fragments.into_iter().zip(results) {
                let _ = fragment.response_tx.try_send(Ok(result));
            }
            metrics.record_flush(resolved, 0);
        }
        Err(err) => {
            warn!(%table, %err, "table group failed, rejecting its fragments");
            let rejected = fragments.len();
            for fragment in fragments {
                let _ = fragment.response_tx.try_send(Err(err.clone()));
            }
            metrics.record_flush(0, rejected);
        }
    }
}
