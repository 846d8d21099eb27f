//! Loading: persist the final table to SQLite and flat files.

pub mod database;
pub mod file;
pub mod pipeline;

pub use database::{
    DatabaseLoadStats, DatabaseLoader, DatabaseLoaderConfig, IfExists, TableSummary, open_database,
    summarize_table,
};
pub use file::{Compression, FileInfo, FileLoadStats, FileLoader, FileLoaderConfig, FileMetadata};
pub use pipeline::{LoaderOutcome, LoadingPipeline, LoadingStats, LoadingSummary};

use crate::error::Result;
use crate::table::{ColumnType, RecordBatch, as_f64};

/// A destination for the final table.
pub trait Loader: Send {
    fn name(&self) -> &str;

    /// Write `batch`. `destination` overrides the configured target
    /// (table name or file name) for this call.
    fn load(&mut self, batch: &RecordBatch, destination: Option<&str>) -> Result<()>;

    /// Decide whether `batch` can be loaded. Never fails.
    fn validate(&self, batch: &RecordBatch) -> bool;

    /// Statistics from the most recent `load` call.
    fn stats(&self) -> serde_json::Value;

    fn test_connection(&mut self) -> bool {
        true
    }
}

/// Checks shared by every loader: a non-empty table, plus warnings for
/// non-finite numbers, missing cells and strings over `max_text_len`.
pub(crate) fn validate_for_load(
    name: &str,
    batch: &RecordBatch,
    max_text_len: Option<usize>,
) -> bool {
    if batch.row_count() == 0 {
        tracing::error!(loader = %name, "Data is empty");
        return false;
    }
    if batch.column_count() == 0 {
        tracing::error!(loader = %name, "No columns in data");
        return false;
    }

    let non_finite = batch
        .numeric_columns()
        .into_iter()
        .flat_map(|c| batch.column(c))
        .filter_map(as_f64)
        .any(|v| !v.is_finite());
    if non_finite {
        tracing::warn!(loader = %name, "Found infinite values in numeric columns");
    }

    let nulls = batch.null_count();
    if nulls > 0 {
        tracing::warn!(loader = %name, missing_values = nulls, "Found missing values in data");
    }

    if let Some(limit) = max_text_len {
        for (idx, column) in batch.columns.iter().enumerate() {
            if batch.column_type(idx) != ColumnType::String {
                continue;
            }
            let longest = batch
                .column(idx)
                .filter_map(|v| v.as_str())
                .map(|s| s.chars().count())
                .max()
                .unwrap_or(0);
            if longest > limit {
                tracing::warn!(
                    loader = %name,
                    column = %column,
                    limit,
                    "Column has strings longer than limit"
                );
            }
        }
    }

    tracing::info!(loader = %name, "Loading validation passed");
    true
}
