//! Query executor contract.
//!
//! A [`QueryExecutor`] runs one rendered warehouse query and returns its
//! result rows as JSON objects. Implementations own connection handling;
//! callers only see rows or a [`WarehouseError`].

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;

use crate::error::WarehouseError;

/// One result row: column name to value.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A positional parameter bound to a rendered query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Binding {
    Text(String),
    Int(i64),
    Date(NaiveDate),
    TextList(Vec<String>),
}

/// A query ready for execution: final SQL text plus its bindings in
/// placeholder order (`$1`, `$2`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedQuery {
    /// Result field this query feeds. Used for logging and error context.
    pub name: String,
    pub sql: String,
    pub bindings: Vec<Binding>,
}

impl RenderedQuery {
    pub fn new(name: impl Into<String>, sql: impl Into<String>, bindings: Vec<Binding>) -> Self {
        Self {
            name: name.into(),
            sql: sql.into(),
            bindings,
        }
    }
}

/// Runs rendered queries against the warehouse.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute one query. Any failure aborts the calling request.
    async fn execute(&self, query: &RenderedQuery) -> Result<Vec<Row>, WarehouseError>;

    /// Check that the warehouse is reachable.
    async fn ping(&self) -> Result<(), WarehouseError> {
        Ok(())
    }
}
