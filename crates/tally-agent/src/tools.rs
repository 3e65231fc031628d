//! The two tools the model can call: schema discovery and SQL execution

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::batching::adaptive_batch_size;
use crate::compression::{Compressor, rows_json};
use crate::data::{QueryEngine, QueryResult, SchemaProvider, TableSchema};
use crate::sanitize::sanitize_sql;
use crate::tool::{ProgressSender, Tool, ToolResult};

pub const SCHEMA_TOOL: &str = "get_database_schema";
pub const RUN_SQL: &str = "run_sql";

/// Rows shown raw when compression cannot produce a summary
pub const RAW_PREVIEW_ROWS: usize = 50;

pub const EMPTY_DATABASE: &str = "The database is empty: no tables have been loaded. \
Ask the user to import a spreadsheet or CSV file first, then try again.";

pub const EMPTY_RESULT: &str = "The query ran successfully but returned 0 rows. \
Do not treat this as the answer yet. The filter conditions are probably too strict: \
loosen them, prefer LIKE '%keyword%' over exact equality for text, and run a partial \
verification query with some conditions removed to check which values actually exist.";

/// One line per table: identifier, source, row count and columns
pub fn format_schema(tables: &[TableSchema]) -> String {
    if tables.is_empty() {
        return EMPTY_DATABASE.to_string();
    }
    tables
        .iter()
        .map(|table| {
            let source = table
                .source_label
                .as_deref()
                .map(|label| format!(" (source: {})", label))
                .unwrap_or_default();
            format!(
                "Table {}{} | {} rows | columns: {}",
                table.safe_name,
                source,
                table.row_count,
                table.columns.join(", ")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Lists the loaded tables
pub struct SchemaTool {
    schema: Arc<dyn SchemaProvider>,
}

impl SchemaTool {
    pub fn new(schema: Arc<dyn SchemaProvider>) -> Self {
        Self { schema }
    }
}

#[async_trait]
impl Tool for SchemaTool {
    fn name(&self) -> &str {
        SCHEMA_TOOL
    }

    fn description(&self) -> &str {
        "List every table in the database with its source, row count and column names. \
         Call this before writing any SQL."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(
        &self,
        _tool_call_id: &str,
        _arguments: serde_json::Value,
        _cancel: CancellationToken,
    ) -> ToolResult {
        let tables = self.schema.tables().await;
        tracing::debug!("Schema lookup returned {} tables", tables.len());
        ToolResult::text(format_schema(&tables))
    }
}

/// Runs one SQL statement and condenses the rows for the model
pub struct RunSqlTool {
    engine: Arc<dyn QueryEngine>,
    compressor: Compressor,
    question: String,
}

impl RunSqlTool {
    pub fn new(engine: Arc<dyn QueryEngine>, compressor: Compressor, question: impl Into<String>) -> Self {
        Self {
            engine,
            compressor,
            question: question.into(),
        }
    }

    async fn observe(
        &self,
        sql: &str,
        result: &QueryResult,
        cancel: &CancellationToken,
        progress: &ProgressSender,
    ) -> ToolResult {
        if let Some(error) = &result.error {
            return ToolResult::error(error.clone());
        }
        if result.rows.is_empty() {
            return ToolResult::text(EMPTY_RESULT);
        }

        let batch_size = adaptive_batch_size(&result.rows);
        let compressed = self
            .compressor
            .compress(&self.question, sql, &result.rows, batch_size, cancel, |p| {
                progress.send(p.to_string())
            })
            .await;

        match compressed {
            Ok(summary) => ToolResult::text(format!(
                "Query returned {} rows. Condensed results:\n{}",
                result.rows.len(),
                summary
            )),
            Err(e) => {
                tracing::warn!("Compression failed, using raw preview: {}", e);
                let shown = result.rows.len().min(RAW_PREVIEW_ROWS);
                ToolResult::text(format!(
                    "Query returned {} rows (showing the first {}):\n{}",
                    result.rows.len(),
                    shown,
                    rows_json(&result.rows[..shown])
                ))
            }
        }
    }
}

#[async_trait]
impl Tool for RunSqlTool {
    fn name(&self) -> &str {
        RUN_SQL
    }

    fn description(&self) -> &str {
        "Run one read-only SQL query against the loaded tables. Wrap table and column \
         names in square brackets, e.g. SELECT [城市], COUNT(*) FROM [t_1] GROUP BY [城市]."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The SQL query to execute"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(
        &self,
        tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
    ) -> ToolResult {
        let (tx, _rx) = tokio::sync::broadcast::channel(1);
        let progress = ProgressSender::new(tx, tool_call_id, RUN_SQL);
        self.execute_with_progress(tool_call_id, arguments, cancel, progress)
            .await
    }

    async fn execute_with_progress(
        &self,
        _tool_call_id: &str,
        arguments: serde_json::Value,
        cancel: CancellationToken,
        progress: ProgressSender,
    ) -> ToolResult {
        let Some(query) = arguments.get("query").and_then(|v| v.as_str()) else {
            return ToolResult::error("Missing required argument: query");
        };

        let sql = sanitize_sql(query);
        if sql != query {
            tracing::debug!("Sanitized SQL: {}", sql);
        }
        tracing::info!("Executing SQL: {}", sql);

        let result = self.engine.execute_sql(&sql).await;
        let observation = self.observe(&sql, &result, &cancel, &progress).await;
        observation.with_result(result)
    }
}
