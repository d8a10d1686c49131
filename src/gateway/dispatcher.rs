use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_channel::{bounded, Receiver, Sender};
use chagall_core::{DispatcherMetrics, GatewayConfig, GatewayError, GatewayResult, Priority};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// A queued operation: a zero-argument async thunk. It may be invoked more
/// than once under retry, so it must be idempotent-safe from the caller's
/// perspective.
pub type OperationFn = Box<dyn FnMut() -> BoxFuture<'static, GatewayResult<Value>> + Send>;

/// One deferred operation waiting for a dispatch slot.
struct QueuedRequest {
    /// Trace-only token; not used for dedup.
    id: Uuid,
    priority: Priority,
    operation: OperationFn,
    response_tx: Sender<GatewayResult<Value>>,
    retries_left: u32,
    queued_at: Instant,
}

/// Priority request queue with a continuously running dispatch loop.
///
/// The loop drains the pending queue under a concurrency cap (a semaphore)
/// and a minimum inter-dispatch interval. Failed operations are retried with
/// exponential backoff and re-inserted at the front of the queue; exhausting
/// the retry budget surfaces the last error to the caller. The loop itself
/// never halts on a request failure.
pub struct Dispatcher {
    config: GatewayConfig,
    pending: Arc<Mutex<VecDeque<QueuedRequest>>>,
    permits: Arc<Semaphore>,
    metrics: Arc<DispatcherMetrics>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(config: GatewayConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent_requests.max(1)));
        Self {
            config,
            pending: Arc::new(Mutex::new(VecDeque::new())),
            permits,
            metrics: Arc::new(DispatcherMetrics::default()),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Spawn the dispatch loop. Idempotent: a second call is a no-op while
    /// the loop is alive.
    pub fn start(&self) {
        let mut task = lock(&self.task);
        if task.as_ref().map(|t| !t.is_finished()).unwrap_or(false) {
            return;
        }
        let config = self.config.clone();
        let pending = self.pending.clone();
        let permits = self.permits.clone();
        let metrics = self.metrics.clone();
        let shutdown = self.shutdown.clone();
        *task = Some(tokio::spawn(run_loop(
            config, pending, permits, metrics, shutdown,
        )));
    }

    /// Cancel the loop and reject everything still queued with
    /// [`GatewayError::Shutdown`].
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = lock(&self.task).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        // Covers the case where the loop never ran, plus any retry that
        // re-queued between the loop's drain and now.
        reject_pending(&self.pending, &self.metrics);
    }

    /// Enqueue `operation` and await its terminal outcome: the first success,
    /// or the last error once the retry budget is spent.
    pub async fn queue<F, Fut>(
        &self,
        priority: Priority,
        retries: u32,
        mut operation: F,
    ) -> GatewayResult<Value>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = GatewayResult<Value>> + Send + 'static,
    {
        let rx = self.submit(
            priority,
            retries,
            Box::new(move || Box::pin(operation()) as BoxFuture<'static, GatewayResult<Value>>),
        )?;
        rx.recv().await.map_err(|_| GatewayError::ChannelClosed)?
    }

    /// Push a request without awaiting its outcome.
    pub(crate) fn submit(
        &self,
        priority: Priority,
        retries: u32,
        operation: OperationFn,
    ) -> GatewayResult<Receiver<GatewayResult<Value>>> {
        if self.shutdown.is_cancelled() {
            return Err(GatewayError::Shutdown);
        }
        let (response_tx, response_rx) = bounded(1);
        let request = QueuedRequest {
            id: Uuid::new_v4(),
            priority,
            operation,
            response_tx,
            retries_left: retries,
            queued_at: Instant::now(),
        };
        debug!(id = %request.id, %priority, retries, "request queued");
        let mut queue = lock(&self.pending);
        queue.push_back(request);
        self.metrics.queued.store(queue.len(), Ordering::Relaxed);
        Ok(response_rx)
    }

    pub fn metrics(&self) -> Arc<DispatcherMetrics> {
        self.metrics.clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn run_loop(
    config: GatewayConfig,
    pending: Arc<Mutex<VecDeque<QueuedRequest>>>,
    permits: Arc<Semaphore>,
    metrics: Arc<DispatcherMetrics>,
    shutdown: CancellationToken,
) {
    let mut last_dispatch: Option<Instant> = None;
    loop {
        if shutdown.is_cancelled() {
            break;
        }

        // Backpressure: never exceed the concurrency cap.
        if permits.available_permits() == 0 {
            if sleep_or_cancel(&shutdown, config.saturation_poll).await {
                break;
            }
            continue;
        }

        // Minimum spacing between dispatches, independent of concurrency.
        if let Some(last) = last_dispatch {
            let elapsed = last.elapsed();
            if elapsed < config.rate_limit_delay
                && sleep_or_cancel(&shutdown, config.rate_limit_delay - elapsed).await
            {
                break;
            }
        }

        let next = {
            let mut queue = lock(&pending);
            let next = select_next(&mut queue);
            metrics.queued.store(queue.len(), Ordering::Relaxed);
            next
        };
        let Some(request) = next else {
            if sleep_or_cancel(&shutdown, config.idle_sleep).await {
                break;
            }
            continue;
        };

        last_dispatch = Some(Instant::now());
        let Ok(permit) = permits.clone().acquire_owned().await else {
            break;
        };
        metrics.in_flight.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(execute(
            request,
            permit,
            pending.clone(),
            metrics.clone(),
            config.clone(),
            shutdown.clone(),
        ));
    }

    reject_pending(&pending, &metrics);
}

/// Stable selection: the first request with the lowest (rank, enqueue time)
/// key, so FIFO order holds within a priority class even when enqueue
/// timestamps collide.
fn select_next(queue: &mut VecDeque<QueuedRequest>) -> Option<QueuedRequest> {
    if queue.is_empty() {
        return None;
    }
    let mut best_idx = 0;
    let mut best_key = (queue[0].priority.rank(), queue[0].queued_at);
    for idx in 1..queue.len() {
        let key = (queue[idx].priority.rank(), queue[idx].queued_at);
        if key < best_key {
            best_idx = idx;
            best_key = key;
        }
    }
    queue.remove(best_idx)
}

/// Decrements the in-flight gauge on drop, permit-style, so the count stays
/// honest even when the attempt unwinds.
struct InFlightGuard(Arc<DispatcherMetrics>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

async fn execute(
    mut request: QueuedRequest,
    permit: OwnedSemaphorePermit,
    pending: Arc<Mutex<VecDeque<QueuedRequest>>>,
    metrics: Arc<DispatcherMetrics>,
    config: GatewayConfig,
    shutdown: CancellationToken,
) {
    let in_flight = InFlightGuard(metrics.clone());
    let attempt = AssertUnwindSafe((request.operation)()).catch_unwind();
    let outcome = match config.operation_timeout {
        Some(deadline) => match timeout(deadline, attempt).await {
            Ok(caught) => caught,
            Err(_) => Ok(Err(GatewayError::Timeout)),
        },
        None => attempt.await,
    };
    // A panicking operation cannot be trusted with a retry; settle the
    // caller terminally instead of letting the channel drop as ChannelClosed.
    let result = match outcome {
        Ok(result) => result,
        Err(_) => {
            metrics.record_failure();
            error!(id = %request.id, "operation panicked");
            let _ = request
                .response_tx
                .send(Err(GatewayError::Backend("operation panicked".into())))
                .await;
            return;
        }
    };

    match result {
        Ok(value) => {
            metrics.record_success();
            if request.response_tx.send(Ok(value)).await.is_err() {
                warn!(id = %request.id, "caller went away before the result arrived");
            }
        }
        Err(err) if err.is_transient() && request.retries_left > 0 => {
            request.retries_left -= 1;
            metrics.record_retry();
            let delay = config.backoff_delay(request.retries_left);
            warn!(
                id = %request.id,
                retries_left = request.retries_left,
                delay_ms = delay.as_millis() as u64,
                %err,
                "attempt failed, backing off before retry"
            );
            // Release the concurrency slot before sleeping out the backoff.
            drop(permit);
            drop(in_flight);
            sleep(delay).await;
            if shutdown.is_cancelled() {
                let _ = request.response_tx.try_send(Err(GatewayError::Shutdown));
                return;
            }
            let mut queue = lock(&pending);
            queue.push_front(request);
            metrics.queued.store(queue.len(), Ordering::Relaxed);
            return;
        }
        Err(err) => {
            metrics.record_failure();
            error!(id = %request.id, %err, "request failed terminally");
            let _ = request.response_tx.send(Err(err)).await;
        }
    }
}

fn reject_pending(pending: &Mutex<VecDeque<QueuedRequest>>, metrics: &DispatcherMetrics) {
    let mut queue = lock(pending);
    while let Some(request) = queue.pop_front() {
        let _ = request.response_tx.try_send(Err(GatewayError::Shutdown));
    }
    metrics.queued.store(0, Ordering::Relaxed);
}

/// Returns true when the token was cancelled during the wait.
async fn sleep_or_cancel(shutdown: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = shutdown.cancelled() => true,
        _ = sleep(duration) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn test_config() -> GatewayConfig {
        GatewayConfig {
            rate_limit_delay: Duration::from_millis(10),
            saturation_poll: Duration::from_millis(5),
            idle_sleep: Duration::from_millis(10),
            operation_timeout: None,
            ..GatewayConfig::default()
        }
    }

    fn recording_op(
        order: Arc<Mutex<Vec<&'static str>>>,
        label: &'static str,
    ) -> OperationFn {
        Box::new(move || {
            let order = order.clone();
            Box::pin(async move {
                lock(&order).push(label);
                Ok(json!(label))
            })
        })
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_by_priority_then_fifo() {
        let dispatcher = Dispatcher::new(test_config());
        let order = Arc::new(Mutex::new(Vec::new()));

        let receivers: Vec<_> = [
            ("low", Priority::Low),
            ("high-1", Priority::High),
            ("medium", Priority::Medium),
            ("high-2", Priority::High),
        ]
        .into_iter()
        .map(|(label, priority)| {
            dispatcher
                .submit(priority, 0, recording_op(order.clone(), label))
                .unwrap()
        })
        .collect();

        dispatcher.start();
        for rx in receivers {
            rx.recv().await.unwrap().unwrap();
        }
        dispatcher.stop().await;

        assert_eq!(
            *lock(&order),
            vec!["high-1", "high-2", "medium", "low"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn concurrency_never_exceeds_the_cap() {
        let config = GatewayConfig {
            max_concurrent_requests: 2,
            ..test_config()
        };
        let dispatcher = Dispatcher::new(config);
        let (release_tx, release_rx) = bounded::<()>(5);
        let current = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let receivers: Vec<_> = (0..5)
            .map(|_| {
                let release_rx = release_rx.clone();
                let current = current.clone();
                let max_seen = max_seen.clone();
                let op: OperationFn = Box::new(move || {
                    let release_rx = release_rx.clone();
                    let current = current.clone();
                    let max_seen = max_seen.clone();
                    Box::pin(async move {
                        let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        let _ = release_rx.recv().await;
                        current.fetch_sub(1, Ordering::SeqCst);
                        Ok(json!(null))
                    })
                });
                dispatcher.submit(Priority::Medium, 0, op).unwrap()
            })
            .collect();

        dispatcher.start();
        // Let the loop saturate the cap while every operation is parked.
        sleep(Duration::from_secs(1)).await;
        assert_eq!(current.load(Ordering::SeqCst), 2);

        for _ in 0..5 {
            release_tx.send(()).await.unwrap();
        }
        for rx in receivers {
            rx.recv().await.unwrap().unwrap();
        }
        dispatcher.stop().await;

        assert_eq!(max_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_bounds_the_attempt_count() {
        let dispatcher = Dispatcher::new(test_config());
        let attempts = Arc::new(AtomicUsize::new(0));
        let op_attempts = attempts.clone();
        let op: OperationFn = Box::new(move || {
            let attempts = op_attempts.clone();
            Box::pin(async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::Backend("still down".into()))
            })
        });

        let rx = dispatcher.submit(Priority::High, 2, op).unwrap();
        dispatcher.start();
        let err = rx.recv().await.unwrap().unwrap_err();
        dispatcher.stop().await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(err, GatewayError::Backend("still down".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_delays_grow_between_attempts() {
        let dispatcher = Dispatcher::new(test_config());
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let op_stamps = stamps.clone();
        let op: OperationFn = Box::new(move || {
            let stamps = op_stamps.clone();
            Box::pin(async move {
                lock(&stamps).push(Instant::now());
                Err(GatewayError::Backend("flaky".into()))
            })
        });

        let rx = dispatcher.submit(Priority::Medium, 3, op).unwrap();
        dispatcher.start();
        rx.recv().await.unwrap().unwrap_err();
        dispatcher.stop().await;

        let stamps = lock(&stamps).clone();
        assert_eq!(stamps.len(), 4);
        let gaps: Vec<_> = stamps.windows(2).map(|w| w[1] - w[0]).collect();
        assert!(gaps[0] >= Duration::from_secs(2));
        assert!(gaps[1] >= Duration::from_secs(4));
        assert!(gaps[2] >= Duration::from_secs(8));
        assert!(gaps[0] <= gaps[1] && gaps[1] <= gaps[2]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_counts_as_a_transient_failure() {
        let config = GatewayConfig {
            operation_timeout: Some(Duration::from_secs(1)),
            ..test_config()
        };
        let dispatcher = Dispatcher::new(config);
        let attempts = Arc::new(AtomicUsize::new(0));
        let op_attempts = attempts.clone();
        let op: OperationFn = Box::new(move || {
            let attempts = op_attempts.clone();
            Box::pin(async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                sleep(Duration::from_secs(3600)).await;
                Ok(json!(null))
            })
        });

        let rx = dispatcher.submit(Priority::Medium, 1, op).unwrap();
        dispatcher.start();
        let err = rx.recv().await.unwrap().unwrap_err();
        dispatcher.stop().await;

        assert_eq!(err, GatewayError::Timeout);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatches_are_spaced_by_the_rate_limit() {
        let config = GatewayConfig {
            rate_limit_delay: Duration::from_millis(100),
            ..test_config()
        };
        let dispatcher = Dispatcher::new(config);
        let stamps = Arc::new(Mutex::new(Vec::new()));

        let receivers: Vec<_> = (0..3)
            .map(|_| {
                let stamps = stamps.clone();
                let op: OperationFn = Box::new(move || {
                    let stamps = stamps.clone();
                    Box::pin(async move {
                        lock(&stamps).push(Instant::now());
                        Ok(json!(null))
                    })
                });
                dispatcher.submit(Priority::Medium, 0, op).unwrap()
            })
            .collect();

        dispatcher.start();
        for rx in receivers {
            rx.recv().await.unwrap().unwrap();
        }
        dispatcher.stop().await;

        let stamps = lock(&stamps).clone();
        assert_eq!(stamps.len(), 3);
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_operation_settles_terminally_and_releases_in_flight() {
        let dispatcher = Dispatcher::new(test_config());
        let op: OperationFn = Box::new(|| Box::pin(async { panic!("poisoned row") }));

        let rx = dispatcher.submit(Priority::Medium, 2, op).unwrap();
        dispatcher.start();
        let err = rx.recv().await.unwrap().unwrap_err();
        dispatcher.stop().await;

        assert_eq!(err, GatewayError::Backend("operation panicked".into()));
        let metrics = dispatcher.metrics();
        assert_eq!(metrics.in_flight.load(Ordering::Relaxed), 0);
        assert_eq!(metrics.failed.load(Ordering::Relaxed), 1);
        // The panic consumed no retry budget.
        assert_eq!(metrics.retried.load(Ordering::Relaxed), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_rejects_everything_still_queued() {
        let dispatcher = Dispatcher::new(test_config());
        let order = Arc::new(Mutex::new(Vec::new()));
        let rx = dispatcher
            .submit(Priority::Low, 0, recording_op(order.clone(), "never"))
            .unwrap();

        dispatcher.stop().await;
        assert_eq!(rx.recv().await.unwrap().unwrap_err(), GatewayError::Shutdown);
        assert!(lock(&order).is_empty());

        let refused = dispatcher.submit(
            Priority::High,
            0,
            recording_op(order.clone(), "refused"),
        );
        assert!(matches!(refused, Err(GatewayError::Shutdown)));
    }
}
