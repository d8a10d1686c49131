//! chagall_query - the backend-facing query layer of the Chagall gateway
//!
//! The rest of the gateway assumes a stable query surface; this crate isolates
//! that assumption from how the underlying client is constructed or mocked.
//! [`RawClient`] is the optional capability surface a backend implementation
//! fills in, [`ClientAdapter`] wraps any such implementation (or none at all)
//! behind benign defaults, and [`QueryBuilder`] gives callers the chainable
//! select/filter/write interface.

pub mod adapter;
pub mod auth;
pub mod builder;
pub mod client;
pub mod plan;
pub mod rest;

pub use adapter::ClientAdapter;
pub use auth::{AuthSession, AuthUser, Credentials};
pub use builder::QueryBuilder;
pub use client::{RawClient, StubClient};
pub use plan::{Filter, FilterOp, Operation, QueryPlan};
pub use rest::{RestClient, RestConfig};
