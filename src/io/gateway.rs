//! Remote data gateway contract
//!
//! Generic CRUD over the named collections. Records travel as JSON values;
//! callers decode into the typed records in `domain::types` with [`decode`]
//! and [`decode_all`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use smallvec::SmallVec;
use thiserror::Error;

use crate::domain::types::Collection;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{collection} request failed with status {status}: {body}")]
    Status { collection: Collection, status: u16, body: String },

    #[error("failed to decode {collection} record: {source}")]
    Decode {
        collection: Collection,
        #[source]
        source: serde_json::Error,
    },

    #[error("gateway unavailable: {0}")]
    Unavailable(String),
}

/// Comparison applied to one column
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOp {
    Eq(Value),
    Neq(Value),
    Gt(Value),
    Gte(Value),
    Lt(Value),
    Lte(Value),
    In(Vec<Value>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub column: String,
    pub op: FilterOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub column: String,
    pub direction: Direction,
}

/// Filters, ordering and limit for [`Gateway::list`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filters: SmallVec<[Filter; 4]>,
    pub order: SmallVec<[Order; 2]>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    fn filter(mut self, column: &str, op: FilterOp) -> Self {
        self.filters.push(Filter { column: column.to_string(), op });
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Eq(value.into()))
    }

    pub fn neq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Neq(value.into()))
    }

    pub fn gt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gt(value.into()))
    }

    pub fn gte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Gte(value.into()))
    }

    pub fn lt(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Lt(value.into()))
    }

    pub fn lte(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(column, FilterOp::Lte(value.into()))
    }

    pub fn is_in<V: Into<Value>>(self, column: &str, values: impl IntoIterator<Item = V>) -> Self {
        self.filter(column, FilterOp::In(values.into_iter().map(Into::into).collect()))
    }

    pub fn order_by(mut self, column: &str, direction: Direction) -> Self {
        self.order.push(Order { column: column.to_string(), direction });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// CRUD over named record collections. One attempt per call; failures are
/// returned to the caller, never retried here.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn create(&self, collection: Collection, record: Value) -> Result<Value, GatewayError>;

    /// `Ok(None)` when no record has this id
    async fn get_by_id(&self, collection: Collection, id: &str)
        -> Result<Option<Value>, GatewayError>;

    async fn list(&self, collection: Collection, query: &Query) -> Result<Vec<Value>, GatewayError>;

    /// `Ok(None)` when no record has this id
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        patch: Value,
    ) -> Result<Option<Value>, GatewayError>;

    async fn delete(&self, collection: Collection, id: &str) -> Result<(), GatewayError>;
}

pub fn decode<T: DeserializeOwned>(collection: Collection, value: Value) -> Result<T, GatewayError> {
    serde_json::from_value(value).map_err(|source| GatewayError::Decode { collection, source })
}

pub fn decode_all<T: DeserializeOwned>(
    collection: Collection,
    values: Vec<Value>,
) -> Result<Vec<T>, GatewayError> {
    values.into_iter().map(|v| decode(collection, v)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::Business;
    use serde_json::json;

    #[test]
    fn test_query_builder_collects_filters_in_order() {
        let query = Query::new()
            .eq("business_id", "b1")
            .gte("appointment_date", "2025-06-01")
            .is_in("status", ["pending", "confirmed"])
            .order_by("appointment_date", Direction::Desc)
            .limit(5);

        assert_eq!(query.filters.len(), 3);
        assert_eq!(query.filters[0].column, "business_id");
        assert_eq!(query.filters[2].op, FilterOp::In(vec![json!("pending"), json!("confirmed")]));
        assert_eq!(query.order[0].direction, Direction::Desc);
        assert_eq!(query.limit, Some(5));
    }

    #[test]
    fn test_decode_reports_collection() {
        let err = decode::<Business>(Collection::Businesses, json!({"is_active": true})).unwrap_err();
        assert!(matches!(err, GatewayError::Decode { collection: Collection::Businesses, .. }));
    }
}
