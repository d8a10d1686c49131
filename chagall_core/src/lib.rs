//! chagall_core - shared types for the Chagall gateway
//!
//! Leaf crate holding the priority classes, configuration, error taxonomy
//! and metrics counters shared by the query layer and the gateway runtime.

pub mod config;
pub mod error;
pub mod metrics;
pub mod priority;

pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use metrics::{BatcherMetrics, DispatcherMetrics};
pub use priority::Priority;
