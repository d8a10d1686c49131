use chagall_core::GatewayResult;
use serde_json::Value;

use crate::adapter::ClientAdapter;
use crate::plan::{Filter, FilterOp, Operation, QueryPlan};

/// Chainable query builder.
///
/// Every link in the chain is infallible; the plan is only handed to the
/// wrapped client when [`run`](Self::run) is awaited. Verb methods
/// (`insert`/`update`/`upsert`/`delete`) switch the plan's operation and can
/// be combined with filters, e.g.
/// `adapter.from_table("habits").eq("id", id).update(patch).run()`.
#[derive(Clone)]
pub struct QueryBuilder {
    adapter: ClientAdapter,
    plan: QueryPlan,
}

impl QueryBuilder {
    pub(crate) fn new(adapter: ClientAdapter, table: impl Into<String>) -> Self {
        Self {
            adapter,
            plan: QueryPlan::new(table, Operation::Select),
        }
    }

    /// Project specific columns; `&["*"]` or an empty slice selects all.
    pub fn select(mut self, columns: &[&str]) -> Self {
        self.plan.op = Operation::Select;
        self.plan.columns = columns
            .iter()
            .filter(|c| **c != "*")
            .map(|c| c.to_string())
            .collect();
        self
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.plan.filters.push(Filter::eq(column, value));
        self
    }

    pub fn gte(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.plan.filters.push(Filter {
            column: column.to_string(),
            op: FilterOp::Gte,
            value: value.into(),
        });
        self
    }

    pub fn lte(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.plan.filters.push(Filter {
            column: column.to_string(),
            op: FilterOp::Lte,
            value: value.into(),
        });
        self
    }

    /// Membership filter: `column` must match one of `values`.
    pub fn is_in(mut self, column: &str, values: Vec<Value>) -> Self {
        self.plan.filters.push(Filter {
            column: column.to_string(),
            op: FilterOp::In,
            value: Value::Array(values),
        });
        self
    }

    pub fn order(mut self, column: &str, descending: bool) -> Self {
        self.plan.order = Some((column.to_string(), descending));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.plan.limit = Some(limit);
        self
    }

    /// Unwrap a single row from the result array.
    pub fn single(mut self) -> Self {
        self.plan.single = true;
        self
    }

    pub fn insert(mut self, data: Value) -> Self {
        self.plan.op = Operation::Insert;
        self.plan.payload = Some(data);
        self
    }

    pub fn update(mut self, data: Value) -> Self {
        self.plan.op = Operation::Update;
        self.plan.payload = Some(data);
        self
    }

    pub fn upsert(mut self, data: Value) -> Self {
        self.plan.op = Operation::Upsert;
        self.plan.payload = Some(data);
        self
    }

    pub fn delete(mut self) -> Self {
        self.plan.op = Operation::Delete;
        self
    }

    /// The plan built so far.
    pub fn plan(&self) -> &QueryPlan {
        &self.plan
    }

    /// Consume the builder without executing; used by the batch aggregator,
    /// which defers execution to its flush tick.
    pub fn into_plan(self) -> QueryPlan {
        self.plan
    }

    /// Execute the plan through the adapter.
    pub async fn run(self) -> GatewayResult<Value> {
        self.adapter.execute(&self.plan).await
    }
}
