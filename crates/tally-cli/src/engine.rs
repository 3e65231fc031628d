//! SQLite-backed query engine and schema provider

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Executor, Row as _, TypeInfo, ValueRef};
use tally_agent::{QueryEngine, QueryResult, Row, SchemaProvider, TableSchema};

/// Rows included with each table for orientation
const SAMPLE_ROWS: usize = 3;

/// A SQLite database opened read-only
pub struct SqliteEngine {
    pool: SqlitePool,
    labels: BTreeMap<String, String>,
}

impl SqliteEngine {
    /// Open the database file read-only
    pub async fn open(path: &Path, labels: BTreeMap<String, String>) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .read_only(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;
        tracing::info!("Opened {}", path.display());
        Ok(Self::from_pool(pool, labels))
    }

    pub fn from_pool(pool: SqlitePool, labels: BTreeMap<String, String>) -> Self {
        Self { pool, labels }
    }

    async fn run(&self, sql: &str) -> Result<QueryResult, sqlx::Error> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        let columns = match rows.first() {
            Some(row) => row.columns().iter().map(|c| c.name().to_string()).collect(),
            None => self
                .pool
                .describe(sql)
                .await
                .map(|d| d.columns().iter().map(|c| c.name().to_string()).collect())
                .unwrap_or_default(),
        };
        let rows = rows.iter().map(row_to_json).collect();
        Ok(QueryResult::rows(columns, rows))
    }

    async fn table_names(&self) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar(
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
    }

    async fn describe_table(&self, name: &str) -> Result<TableSchema, sqlx::Error> {
        let quoted = quote_ident(name);
        let columns: Vec<String> = sqlx::query(&format!("PRAGMA table_info({})", quoted))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| row.try_get::<String, _>("name"))
            .collect::<Result<_, _>>()?;
        let row_count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", quoted))
            .fetch_one(&self.pool)
            .await?;
        let sample_rows = sqlx::query(&format!("SELECT * FROM {} LIMIT {}", quoted, SAMPLE_ROWS))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(row_to_json)
            .collect();

        Ok(TableSchema {
            safe_name: name.to_string(),
            source_label: self.labels.get(name).cloned(),
            columns,
            row_count: usize::try_from(row_count).unwrap_or(0),
            sample_rows,
        })
    }
}

#[async_trait]
impl QueryEngine for SqliteEngine {
    async fn execute_sql(&self, sql: &str) -> QueryResult {
        match self.run(sql).await {
            Ok(result) => {
                tracing::debug!("Query returned {} rows", result.rows.len());
                result
            }
            Err(e) => {
                tracing::debug!("Query failed: {}", e);
                QueryResult::failed(e.to_string())
            }
        }
    }
}

#[async_trait]
impl SchemaProvider for SqliteEngine {
    async fn tables(&self) -> Vec<TableSchema> {
        let names = match self.table_names().await {
            Ok(names) => names,
            Err(e) => {
                tracing::warn!("Failed to list tables: {}", e);
                return vec![];
            }
        };

        let mut tables = Vec::with_capacity(names.len());
        for name in names {
            match self.describe_table(&name).await {
                Ok(table) => tables.push(table),
                Err(e) => tracing::warn!("Skipping table {}: {}", name, e),
            }
        }
        tables
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Convert a row into a JSON object keyed by column name, in column order
fn row_to_json(row: &SqliteRow) -> Row {
    let mut map = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        map.insert(column.name().to_string(), cell_to_json(row, i));
    }
    map
}

fn cell_to_json(row: &SqliteRow, index: usize) -> Value {
    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_uppercase(),
        Err(_) => return Value::Null,
    };

    match type_name.as_str() {
        "INTEGER" | "INT8" | "BIGINT" => row
            .try_get::<i64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => row
            .try_get::<f64, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BOOLEAN" => row
            .try_get::<bool, _>(index)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(index)
            .map(|bytes| Value::String(format!("<{} bytes>", bytes.len())))
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(index)
            .map(Value::String)
            .unwrap_or(Value::Null),
    }
}
