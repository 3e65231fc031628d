//! Adaptive batch sizing for result compression
//!
//! Wide rows and long text cells cost more context per row, so the batch size
//! shrinks as the sampled rows get heavier.

use crate::data::Row;
use serde_json::Value;

/// Rows inspected when measuring a result set
pub const SAMPLE_ROWS: usize = 20;
/// Batch size used for an empty result set
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const MIN_BATCH_SIZE: usize = 5;
pub const MAX_BATCH_SIZE: usize = 100;
/// Text cells at least this long count as long text
pub const LONG_TEXT_CHARS: usize = 256;

const FIELDS_CEILING: f64 = 40.0;
const ROW_LEN_CEILING: f64 = 4000.0;

/// Shape of a sampled result set
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ComplexityMetrics {
    /// Average number of fields per row
    pub avg_fields: f64,
    /// Average serialized row length in characters
    pub avg_row_len: f64,
    /// Fraction of non-null cells holding text
    pub text_ratio: f64,
    /// Fraction of non-null cells holding text of at least [`LONG_TEXT_CHARS`]
    pub long_text_ratio: f64,
}

impl ComplexityMetrics {
    /// Measure the first [`SAMPLE_ROWS`] rows
    pub fn measure(rows: &[Row]) -> Self {
        let sample = &rows[..rows.len().min(SAMPLE_ROWS)];
        if sample.is_empty() {
            return Self::default();
        }
        let n = sample.len() as f64;

        let avg_fields = sample.iter().map(|r| r.len()).sum::<usize>() as f64 / n;
        let avg_row_len = sample
            .iter()
            .map(|r| serialized_len(r))
            .sum::<usize>() as f64
            / n;

        let mut non_null = 0usize;
        let mut text = 0usize;
        let mut long_text = 0usize;
        for value in sample.iter().flat_map(|r| r.values()) {
            match value {
                Value::Null => {}
                Value::String(s) => {
                    non_null += 1;
                    text += 1;
                    if s.chars().count() >= LONG_TEXT_CHARS {
                        long_text += 1;
                    }
                }
                _ => non_null += 1,
            }
        }

        let (text_ratio, long_text_ratio) = if non_null == 0 {
            (0.0, 0.0)
        } else {
            (
                text as f64 / non_null as f64,
                long_text as f64 / non_null as f64,
            )
        };

        Self {
            avg_fields,
            avg_row_len,
            text_ratio,
            long_text_ratio,
        }
    }

    /// Composite complexity in `[0, 1]`
    pub fn complexity(&self) -> f64 {
        let c_fields = (self.avg_fields / FIELDS_CEILING).min(1.0);
        let c_len = (self.avg_row_len / ROW_LEN_CEILING).min(1.0);
        let c_text = 0.5 * self.text_ratio + 0.5 * self.long_text_ratio;
        (0.4 * c_fields + 0.3 * c_len + 0.3 * c_text).clamp(0.0, 1.0)
    }

    /// Rows per compression round for this shape
    pub fn batch_size(&self) -> usize {
        let span = (MAX_BATCH_SIZE - MIN_BATCH_SIZE) as f64;
        let size = (MAX_BATCH_SIZE as f64 - span * self.complexity()).floor();
        (size.max(0.0) as usize).clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE)
    }
}

/// Rows per compression round for a result set
pub fn adaptive_batch_size(rows: &[Row]) -> usize {
    if rows.is_empty() {
        return DEFAULT_BATCH_SIZE;
    }
    let metrics = ComplexityMetrics::measure(rows);
    let size = metrics.batch_size();
    tracing::debug!(
        rows = rows.len(),
        avg_fields = metrics.avg_fields,
        avg_row_len = metrics.avg_row_len,
        complexity = metrics.complexity(),
        batch_size = size,
        "computed compression batch size"
    );
    size
}

fn serialized_len(row: &Row) -> usize {
    match serde_json::to_string(row) {
        Ok(s) => s.chars().count(),
        Err(_) => row
            .values()
            .map(|v| match v {
                Value::String(s) => s.chars().count(),
                other => other.to_string().chars().count(),
            })
            .sum(),
    }
}
