//! Compression of large query results
//!
//! Rows are folded through the model batch by batch. Each call sees the
//! running summary and returns a new one that replaces it, so batch `i + 1`
//! always builds on batch `i`. A batch whose call fails keeps the fold going:
//! its rows are appended to the summary as raw JSON instead.

use std::{fmt, sync::Arc};

use tally_ai::Message;
use tokio_util::sync::CancellationToken;

use crate::data::Row;
use crate::error::{Error, Result};
use crate::transport::{RunConfig, Transport};

/// Configuration for result compression
#[derive(Debug, Clone)]
pub struct CompressionConfig {
    /// Output budget for each summarization call
    pub max_tokens: Option<u32>,
    /// Sampling temperature for summarization calls
    pub temperature: Option<f32>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            max_tokens: Some(2048),
            temperature: Some(0.1),
        }
    }
}

/// Progress after one compression round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    /// 1-based index of the batch just processed
    pub batch: usize,
    pub total: usize,
    /// Rows in this batch
    pub size: usize,
    /// Whether the model call for this batch failed
    pub fell_back: bool,
}

impl fmt::Display for BatchProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Compressing results: batch {}/{} ({} rows)",
            self.batch, self.total, self.size
        )?;
        if self.fell_back {
            write!(f, ", kept raw after summarization failed")?;
        }
        Ok(())
    }
}

const COMPRESSION_SYSTEM_PROMPT: &str = "\
You condense SQL query results so another assistant can answer a user's question \
from them. You receive the results in batches together with the summary built from \
the earlier batches. Your output always replaces that summary entirely.";

const NO_PRIOR_CONTEXT: &str = "(none: this is the first batch)";

/// Render the prompt for one batch
pub fn build_batch_prompt(
    question: &str,
    sql: &str,
    summary: Option<&str>,
    rows: &[Row],
    batch: usize,
    total: usize,
) -> String {
    format!(
        "\
User question:
{question}

SQL that produced these rows:
{sql}

Summary of earlier batches:
{summary}

Batch {batch} of {total} ({size} rows):
{rows}

Pick the mode that fits the question:
- Detail extraction, for questions that list or look up records: keep every record \
that is relevant, with the exact values needed to answer.
- Calculation and insight, for questions that aggregate: keep running totals, counts, \
extremes and the figures needed to finish the calculation.

Merge the new rows into the earlier summary and carry every fact from it forward. \
Any raw data marker in the earlier summary is part of the data and must be merged too. \
Reply with the complete updated summary as plain text only.",
        summary = summary.unwrap_or(NO_PRIOR_CONTEXT),
        size = rows.len(),
        rows = rows_json(rows),
    )
}

/// Marker appended in place of a summary for a failed batch
pub fn raw_fallback_marker(rows: &[Row], batch: usize, total: usize) -> String {
    format!(
        "[raw data for batch {}/{}, summarization failed]\n{}",
        batch,
        total,
        rows_json(rows)
    )
}

/// Rows as a JSON array, compact
pub fn rows_json(rows: &[Row]) -> String {
    serde_json::to_string(rows).unwrap_or_else(|_| "[]".to_string())
}

/// Folds result rows into a summary through the model
#[derive(Clone)]
pub struct Compressor {
    transport: Arc<dyn Transport>,
    run_config: RunConfig,
}

impl Compressor {
    /// Derive the summarization request settings from the session's
    pub fn new(
        transport: Arc<dyn Transport>,
        session: &RunConfig,
        config: &CompressionConfig,
    ) -> Self {
        let run_config = RunConfig {
            system_prompt: Some(COMPRESSION_SYSTEM_PROMPT.to_string()),
            tools: vec![],
            model: session.model.clone(),
            api_key: session.api_key.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        };
        Self {
            transport,
            run_config,
        }
    }

    /// Compress `rows` in batches of `batch_size`.
    ///
    /// Fails only when cancelled or when no batch produced a summary.
    pub async fn compress(
        &self,
        question: &str,
        sql: &str,
        rows: &[Row],
        batch_size: usize,
        cancel: &CancellationToken,
        mut on_progress: impl FnMut(BatchProgress) + Send,
    ) -> Result<String> {
        let batches: Vec<&[Row]> = rows.chunks(batch_size.max(1)).collect();
        let total = batches.len();
        let mut summary: Option<String> = None;
        let mut summarized = 0usize;

        for (i, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let index = i + 1;
            let prompt = build_batch_prompt(question, sql, summary.as_deref(), batch, index, total);

            let fell_back = match self.summarize(prompt, cancel).await {
                Ok(text) => {
                    summary = Some(text);
                    summarized += 1;
                    false
                }
                Err(e) if e.is_cancelled() => return Err(Error::Cancelled),
                Err(e) => {
                    tracing::warn!("Compression batch {}/{} failed: {}", index, total, e);
                    let marker = raw_fallback_marker(batch, index, total);
                    summary = Some(match summary.take() {
                        Some(text) => format!("{}\n\n{}", text, marker),
                        None => marker,
                    });
                    true
                }
            };

            tracing::debug!(batch = index, total, rows = batch.len(), fell_back, "compression round done");
            on_progress(BatchProgress {
                batch: index,
                total,
                size: batch.len(),
                fell_back,
            });
        }

        if summarized == 0 {
            return Err(Error::Compression(format!(
                "all {} summarization calls failed",
                total
            )));
        }
        Ok(summary.unwrap_or_default())
    }

    async fn summarize(&self, prompt: String, cancel: &CancellationToken) -> Result<String> {
        let text = self
            .transport
            .complete(vec![Message::user(prompt)], &self.run_config, cancel.clone())
            .await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(Error::Compression("summarization returned empty text".into()));
        }
        Ok(text.to_string())
    }
}
