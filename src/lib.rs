//! chagall - a resilient client-side gateway for hosted relational backends
//!
//! Named after Marc Chagall. The gateway sits between application code and a
//! remote database-as-a-service API and adds the coordination the raw client
//! lacks: a priority request queue with concurrency and rate limiting,
//! exponential-backoff retry, a time-windowed batch aggregator that groups
//! per-table query fragments, and a defensive client adapter that tolerates
//! partial or absent backend clients.
//!
//! The composition root constructs one [`Gateway`], calls
//! [`start`](Gateway::start), and hands it around; [`stop`](Gateway::stop)
//! cancels every background loop it owns.

pub mod gateway;
pub mod service;
pub mod telemetry;

pub use chagall_core::{
    BatcherMetrics, DispatcherMetrics, GatewayConfig, GatewayError, GatewayResult, Priority,
};
pub use chagall_query::{
    AuthSession, AuthUser, ClientAdapter, Credentials, Filter, FilterOp, Operation, QueryBuilder,
    QueryPlan, RawClient, RestClient, RestConfig, StubClient,
};
pub use gateway::health::HealthStatus;
pub use service::Gateway;
