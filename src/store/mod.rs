//! The narrow interface the durability layer uses to reach the live store.

pub mod sqlite;

use std::future::Future;
use std::sync::Arc;

use crate::codec::{Statement, Value};
use crate::errors::Result;

pub use sqlite::SqliteStore;

/// One result row: shared column names plus this row's values.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    pub fn get_text(&self, column: &str) -> Option<&str> {
        match self.get(column) {
            Some(Value::Text(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_i64(&self, column: &str) -> Option<i64> {
        match self.get(column) {
            Some(Value::Integer(v)) => Some(*v),
            _ => None,
        }
    }
}

/// Query/execute access to the live store.
///
/// Implementations must wrap every failure as a store error carrying the statement text.
pub trait Store: Send + Sync {
    fn query(&self, statement: &Statement) -> impl Future<Output = Result<Vec<Row>>> + Send;

    /// Returns the number of rows changed.
    fn execute(&self, statement: &Statement) -> impl Future<Output = Result<u64>> + Send;

    /// Runs all statements in one transaction; either all commit or none do.
    fn transaction(&self, statements: &[Statement])
    -> impl Future<Output = Result<u64>> + Send;
}
