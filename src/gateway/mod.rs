//! Background machinery of the gateway: the priority dispatcher, the batch
//! aggregator, the adapter ring and the health monitor. Each loop is a
//! spawned task driven by `tokio::select!` against a cancellation token, so
//! [`Gateway::stop`](crate::Gateway::stop) can actually end it.

pub mod batcher;
pub mod dispatcher;
pub mod health;
pub mod ring;

pub use batcher::Batcher;
pub use dispatcher::Dispatcher;
pub use health::HealthMonitor;
pub use ring::AdapterRing;
