mod batch;
mod service;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chagall::{GatewayError, GatewayResult, Operation, QueryPlan, RawClient};
use serde_json::{json, Value};

/// Backend double shared by the integration tests: echoes plans, can be
/// scripted to fail the first N calls, keeps what it executed.
pub struct MockBackend {
    pub executed: Mutex<Vec<QueryPlan>>,
    fail_first: AtomicUsize,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            executed: Mutex::new(Vec::new()),
            fail_first: AtomicUsize::new(0),
        })
    }

    pub fn failing_first(n: usize) -> Arc<Self> {
        let backend = Self::new();
        backend.fail_first.store(n, Ordering::SeqCst);
        backend
    }

    pub fn executed(&self) -> Vec<QueryPlan> {
        self.executed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl RawClient for MockBackend {
    async fn run_query(&self, plan: &QueryPlan) -> GatewayResult<Value> {
        if self
            .fail_first
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(GatewayError::Backend("scripted failure".into()));
        }
        self.executed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(plan.clone());

        match plan.op {
            Operation::Select => {
                // One row shaped from the first filter, so every caller can
                // recognize its own result.
                let row = plan
                    .filters
                    .first()
                    .map(|f| json!({ f.column.clone(): f.value.clone() }))
                    .unwrap_or_else(|| json!({}));
                Ok(json!([row]))
            }
            Operation::Insert | Operation::Update | Operation::Upsert => {
                Ok(plan.payload.clone().unwrap_or(Value::Null))
            }
            Operation::Delete => Ok(Value::Null),
        }
    }
}
