use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Verb of a query plan.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Operation {
    Select,
    Insert,
    Update,
    Upsert,
    Delete,
}

impl Operation {
    /// Writes echo their payload when the wrapped client lacks the
    /// capability; reads fall back to null.
    pub fn is_write(self) -> bool {
        matches!(self, Operation::Insert | Operation::Update | Operation::Upsert)
    }
}

/// Comparison operators supported by the chain.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Gte,
    Lte,
    In,
}

impl FilterOp {
    /// PostgREST operator keyword.
    pub fn keyword(self) -> &'static str {
        match self {
            FilterOp::Eq => "eq",
            FilterOp::Gte => "gte",
            FilterOp::Lte => "lte",
            FilterOp::In => "in",
        }
    }
}

/// One equality/range/membership predicate on a column.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    /// Right-hand side in PostgREST query-string form, e.g. `eq.42` or
    /// `in.(a,b,c)`.
    pub fn rhs(&self) -> String {
        match self.op {
            FilterOp::In => {
                let items = match &self.value {
                    Value::Array(items) => items.iter().map(render_scalar).collect::<Vec<_>>(),
                    other => vec![render_scalar(other)],
                };
                format!("in.({})", items.join(","))
            }
            op => format!("{}.{}", op.keyword(), render_scalar(&self.value)),
        }
    }
}

fn render_scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// A fully structured, backend-agnostic description of one table operation.
///
/// Built by [`QueryBuilder`](crate::QueryBuilder), consumed by
/// [`RawClient::run_query`](crate::RawClient::run_query) implementations.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QueryPlan {
    pub table: String,
    pub op: Operation,
    /// Projected columns; empty means `*`.
    pub columns: Vec<String>,
    pub filters: Vec<Filter>,
    /// `(column, descending)`.
    pub order: Option<(String, bool)>,
    pub limit: Option<usize>,
    /// Unwrap a single row from the result array.
    pub single: bool,
    /// Row payload for insert/update/upsert.
    pub payload: Option<Value>,
}

impl QueryPlan {
    pub fn new(table: impl Into<String>, op: Operation) -> Self {
        Self {
            table: table.into(),
            op,
            columns: Vec::new(),
            filters: Vec::new(),
            order: None,
            limit: None,
            single: false,
            payload: None,
        }
    }

    /// Query-string parameters in PostgREST form. Shared by the REST client
    /// and useful for tracing.
    pub fn query_params(&self) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if self.op == Operation::Select {
            let projection = if self.columns.is_empty() {
                "*".to_string()
            } else {
                self.columns.join(",")
            };
            params.push(("select".to_string(), projection));
        }
        for filter in &self.filters {
            params.push((filter.column.clone(), filter.rhs()));
        }
        if let Some((column, descending)) = &self.order {
            let direction = if *descending { "desc" } else { "asc" };
            params.push(("order".to_string(), format!("{column}.{direction}")));
        }
        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }
        params
    }
}
