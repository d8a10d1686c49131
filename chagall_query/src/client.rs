use async_trait::async_trait;
use chagall_core::{GatewayError, GatewayResult};
use serde_json::Value;

use crate::auth::{AuthSession, AuthUser, Credentials};
use crate::plan::QueryPlan;

/// Optional capability surface of a backend client.
///
/// Every method has a default body returning
/// [`GatewayError::Unsupported`], so a partial implementation (a test double,
/// or a client for a backend without edge functions) overrides only what it
/// actually supports. The [`ClientAdapter`](crate::ClientAdapter) maps
/// `Unsupported` to a benign default and lets every other error through
/// unchanged.
#[async_trait]
pub trait RawClient: Send + Sync {
    /// Execute one table operation.
    async fn run_query(&self, plan: &QueryPlan) -> GatewayResult<Value> {
        let _ = plan;
        Err(GatewayError::Unsupported)
    }

    /// Call a stored procedure.
    async fn rpc(&self, name: &str, args: Value) -> GatewayResult<Value> {
        let _ = (name, args);
        Err(GatewayError::Unsupported)
    }

    /// Invoke a hosted edge function.
    async fn invoke_function(&self, name: &str, payload: Value) -> GatewayResult<Value> {
        let _ = (name, payload);
        Err(GatewayError::Unsupported)
    }

    async fn get_user(&self) -> GatewayResult<AuthUser> {
        Err(GatewayError::Unsupported)
    }

    async fn get_session(&self) -> GatewayResult<AuthSession> {
        Err(GatewayError::Unsupported)
    }

    async fn sign_in(&self, credentials: &Credentials) -> GatewayResult<AuthSession> {
        let _ = credentials;
        Err(GatewayError::Unsupported)
    }

    async fn sign_out(&self) -> GatewayResult<()> {
        Err(GatewayError::Unsupported)
    }
}

/// A client with no capabilities at all. Everything it is asked to do comes
/// back `Unsupported`, which the adapter then turns into defaults.
#[derive(Debug, Default, Clone, Copy)]
pub struct StubClient;

#[async_trait]
impl RawClient for StubClient {}
