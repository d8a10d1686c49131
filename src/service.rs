use std::sync::Arc;

use chagall_core::{
    BatcherMetrics, DispatcherMetrics, GatewayConfig, GatewayError, GatewayResult, Priority,
};
use chagall_query::{
    AuthSession, AuthUser, ClientAdapter, Credentials, Filter, Operation, QueryPlan, RawClient,
};
use futures::future::try_join_all;
use serde_json::Value;
use tracing::info;

use crate::gateway::{AdapterRing, Batcher, Dispatcher, HealthMonitor};
use crate::gateway::health::HealthStatus;

/// The gateway facade: one dependency-injected instance owning the adapter
/// ring, the priority dispatcher, the batch aggregator and the health
/// monitor.
///
/// The composition root builds it once with [`Gateway::new`], calls
/// [`start`](Gateway::start), and shares it; [`stop`](Gateway::stop) cancels
/// all three background loops, so repeated construct/teardown cycles (tests,
/// hot reload) leak nothing.
pub struct Gateway {
    config: GatewayConfig,
    ring: Arc<AdapterRing>,
    dispatcher: Dispatcher,
    batcher: Batcher,
    health: HealthMonitor,
}

impl Gateway {
    /// `raw` is whatever backend client the environment provides; `None`
    /// wires in the stub, which every operation resolves against defaults.
    pub fn new(config: GatewayConfig, raw: Option<Arc<dyn RawClient>>) -> Self {
        let adapter = ClientAdapter::wrap(raw);
        let ring = Arc::new(AdapterRing::new(adapter, config.max_pool_size));
        let dispatcher = Dispatcher::new(config.clone());
        let batcher = Batcher::new(config.clone(), ring.clone());
        let health = HealthMonitor::new(ring.clone(), config.health_check_interval);
        Self {
            config,
            ring,
            dispatcher,
            batcher,
            health,
        }
    }

    /// Start the dispatcher, flush and health loops.
    pub fn start(&self) {
        self.dispatcher.start();
        self.batcher.start();
        self.health.start();
        info!(
            pool = self.ring.len(),
            cap = self.config.max_concurrent_requests,
            "gateway started"
        );
    }

    /// Stop every background loop. Queued requests are rejected with
    /// [`GatewayError::Shutdown`]; pending batch fragments get one final
    /// flush.
    pub async fn stop(&self) {
        self.health.stop().await;
        self.dispatcher.stop().await;
        self.batcher.stop().await;
        info!("gateway stopped");
    }

    // ---- prioritized pass-through operations ------------------------------

    pub async fn sign_in(&self, email: &str, password: &str) -> GatewayResult<AuthSession> {
        let adapter = self.ring.next();
        let credentials = Credentials::new(email, password);
        let value = self
            .dispatcher
            .queue(Priority::High, self.config.default_retries, move || {
                let adapter = adapter.clone();
                let credentials = credentials.clone();
                async move {
                    let session = adapter.sign_in(&credentials).await?;
                    serde_json::to_value(session).map_err(GatewayError::from)
                }
            })
            .await?;
        serde_json::from_value(value).map_err(GatewayError::from)
    }

    pub async fn sign_out(&self) -> GatewayResult<()> {
        let adapter = self.ring.next();
        self.dispatcher
            .queue(Priority::High, self.config.default_retries, move || {
                let adapter = adapter.clone();
                async move {
                    adapter.sign_out().await?;
                    Ok(Value::Null)
                }
            })
            .await?;
        Ok(())
    }

    pub async fn current_user(&self) -> GatewayResult<AuthUser> {
        let adapter = self.ring.next();
        let value = self
            .dispatcher
            .queue(Priority::Medium, self.config.default_retries, move || {
                let adapter = adapter.clone();
                async move {
                    let user = adapter.get_user().await?;
                    serde_json::to_value(user).map_err(GatewayError::from)
                }
            })
            .await?;
        serde_json::from_value(value).map_err(GatewayError::from)
    }

    /// Single-row read: first match for the filters, or null.
    pub async fn fetch_one(&self, table: &str, filters: Vec<Filter>) -> GatewayResult<Value> {
        let mut plan = QueryPlan::new(table, Operation::Select);
        plan.filters = filters;
        plan.limit = Some(1);
        plan.single = true;
        self.run_plan(Priority::Medium, plan).await
    }

    pub async fn fetch_all(&self, table: &str, filters: Vec<Filter>) -> GatewayResult<Value> {
        let mut plan = QueryPlan::new(table, Operation::Select);
        plan.filters = filters;
        self.run_plan(Priority::Medium, plan).await
    }

    pub async fn insert(&self, table: &str, row: Value) -> GatewayResult<Value> {
        let mut plan = QueryPlan::new(table, Operation::Insert);
        plan.payload = Some(row);
        self.run_plan(Priority::Medium, plan).await
    }

    pub async fn upsert(&self, table: &str, row: Value) -> GatewayResult<Value> {
        let mut plan = QueryPlan::new(table, Operation::Upsert);
        plan.payload = Some(row);
        self.run_plan(Priority::Medium, plan).await
    }

    pub async fn update(
        &self,
        table: &str,
        row: Value,
        filters: Vec<Filter>,
    ) -> GatewayResult<Value> {
        let mut plan = QueryPlan::new(table, Operation::Update);
        plan.payload = Some(row);
        plan.filters = filters;
        self.run_plan(Priority::Medium, plan).await
    }

    pub async fn delete(&self, table: &str, filters: Vec<Filter>) -> GatewayResult<Value> {
        let mut plan = QueryPlan::new(table, Operation::Delete);
        plan.filters = filters;
        self.run_plan(Priority::Medium, plan).await
    }

    pub async fn rpc(&self, name: &str, args: Value) -> GatewayResult<Value> {
        let adapter = self.ring.next();
        let name = name.to_string();
        self.dispatcher
            .queue(Priority::Medium, self.config.default_retries, move || {
                let adapter = adapter.clone();
                let name = name.clone();
                let args = args.clone();
                async move { adapter.rpc(&name, args).await }
            })
            .await
    }

    pub async fn invoke_function(&self, name: &str, payload: Value) -> GatewayResult<Value> {
        let adapter = self.ring.next();
        let name = name.to_string();
        self.dispatcher
            .queue(Priority::Medium, self.config.default_retries, move || {
                let adapter = adapter.clone();
                let name = name.clone();
                let payload = payload.clone();
                async move { adapter.invoke_function(&name, payload).await }
            })
            .await
    }

    async fn run_plan(&self, priority: Priority, plan: QueryPlan) -> GatewayResult<Value> {
        let adapter = self.ring.next();
        self.dispatcher
            .queue(priority, self.config.default_retries, move || {
                let adapter = adapter.clone();
                let plan = plan.clone();
                async move { adapter.execute(&plan).await }
            })
            .await
    }

    // ---- batch convenience methods ----------------------------------------

    /// Append a select fragment to the next flush window.
    pub async fn batch_select(&self, table: &str, filters: Vec<Filter>) -> GatewayResult<Value> {
        self.batcher.select(table, filters).await
    }

    /// Append an insert fragment to the next flush window.
    pub async fn batch_insert(&self, table: &str, data: Value) -> GatewayResult<Value> {
        self.batcher.insert(table, data).await
    }

    /// Append an update fragment to the next flush window.
    pub async fn batch_update(
        &self,
        table: &str,
        data: Value,
        filters: Vec<Filter>,
    ) -> GatewayResult<Value> {
        self.batcher.update(table, data, filters).await
    }

    /// Append a delete fragment to the next flush window.
    pub async fn batch_delete(&self, table: &str, filters: Vec<Filter>) -> GatewayResult<Value> {
        self.batcher.delete(table, filters).await
    }

    /// Fetch rows for many identifiers inside one flush window: one select
    /// fragment per id, joined all-or-error.
    pub async fn batch_fetch(
        &self,
        table: &str,
        key_column: &str,
        ids: Vec<Value>,
    ) -> GatewayResult<Vec<Value>> {
        let calls = ids
            .into_iter()
            .map(|id| self.batcher.select(table, vec![Filter::eq(key_column, id)]));
        try_join_all(calls).await
    }

    // ---- observability -----------------------------------------------------

    pub fn health(&self) -> HealthStatus {
        self.health.status()
    }

    pub fn dispatcher_metrics(&self) -> Arc<DispatcherMetrics> {
        self.dispatcher.metrics()
    }

    pub fn batcher_metrics(&self) -> Arc<BatcherMetrics> {
        self.batcher.metrics()
    }

    /// Direct, unqueued access to the adapter rotation; for callers that
    /// must bypass the queue (startup probes, migrations).
    pub fn adapter(&self) -> ClientAdapter {
        self.ring.next()
    }
}
