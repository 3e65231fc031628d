//! Boundary types for the query engine and the schema provider.
//!
//! Both collaborators live outside this crate. The orchestrator only reads
//! schemas and submits SQL text; it never mutates either.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One result row: column name to cell value, in column order
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A table the model can query
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    /// Identifier usable in SQL without quoting
    pub safe_name: String,
    /// Human-readable origin, e.g. the workbook and sheet it came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_label: Option<String>,
    /// Column names in declaration order
    pub columns: Vec<String>,
    /// Number of rows in the table
    pub row_count: usize,
    /// A few rows for orientation
    #[serde(default)]
    pub sample_rows: Vec<Row>,
}

/// Result of executing one SQL statement
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResult {
    /// A successful result
    pub fn rows(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Self {
            columns,
            rows,
            error: None,
        }
    }

    /// A failed result carrying the engine's message
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            columns: vec![],
            rows: vec![],
            error: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Executes SQL against the loaded tables
#[async_trait]
pub trait QueryEngine: Send + Sync {
    /// Run one statement; failures are reported through [`QueryResult::error`]
    async fn execute_sql(&self, sql: &str) -> QueryResult;
}

/// Supplies the current set of tables
#[async_trait]
pub trait SchemaProvider: Send + Sync {
    /// Snapshot of all registered tables
    async fn tables(&self) -> Vec<TableSchema>;
}
