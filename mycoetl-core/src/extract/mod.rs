//! Extraction: pull a table out of a remote dataset, a local file or an HTTP API.

pub mod api;
pub mod file;
pub mod orchestrator;
pub mod uci;

pub use api::{ApiExtractor, ApiExtractorConfig};
pub use file::{FileExtractor, FileExtractorConfig, FileType};
pub use orchestrator::{
    ExtractionOrchestrator, ExtractionStats, ExtractionSummary, ExtractorOutcome,
};
pub use uci::{MUSHROOM_COLUMNS, UciMushroomExtractor};

use crate::error::Result;
use crate::persistence::atomic_write_json;
use crate::table::RecordBatch;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Missing-cell fraction above which validation logs a warning.
pub const MISSING_WARN_RATIO: f64 = 0.5;

/// A source of tabular data.
#[async_trait]
pub trait Extractor: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the table. Source failures are returned as errors.
    async fn extract(&self) -> Result<RecordBatch>;

    /// Decide whether an extracted table is usable. Never fails.
    fn validate(&self, batch: &RecordBatch) -> bool;
}

/// Sidecar written next to raw extracted data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_type: Option<String>,
    pub extraction_date: DateTime<Utc>,
    pub records_count: usize,
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
}

impl ExtractionMetadata {
    pub fn new(source: impl Into<String>, batch: &RecordBatch) -> Self {
        Self {
            source: source.into(),
            url: None,
            file_path: None,
            file_type: None,
            extraction_date: Utc::now(),
            records_count: batch.row_count(),
            columns: batch.columns.clone(),
            output_file: None,
        }
    }
}

/// Write `{name}_metadata.json` into `dir` and return its path.
pub fn save_extraction_metadata(
    dir: &Path,
    name: &str,
    metadata: &ExtractionMetadata,
) -> Result<PathBuf> {
    let path = dir.join(format!("{name}_metadata.json"));
    atomic_write_json(&path, metadata)?;
    tracing::info!(extractor = %name, path = %path.display(), "Extraction metadata saved");
    Ok(path)
}

/// Log a warning when more than half of the cells are missing. Returns the ratio.
pub fn check_missing_ratio(name: &str, batch: &RecordBatch) -> f64 {
    let ratio = batch.missing_ratio();
    if ratio > MISSING_WARN_RATIO {
        tracing::warn!(
            extractor = %name,
            missing_pct = %format!("{:.1}", ratio * 100.0),
            "High missing value percentage"
        );
    }
    ratio
}
