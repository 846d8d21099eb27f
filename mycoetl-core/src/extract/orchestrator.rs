//! Runs a set of extractors in order and collects their output.

use super::Extractor;
use crate::error::Result;
use crate::persistence::atomic_write_json;
use crate::table::RecordBatch;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Counters for one extraction run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionStats {
    pub total_extractors: usize,
    pub successful_extractions: usize,
    pub failed_extractions: usize,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
}

/// Per-extractor entry of an [`ExtractionSummary`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractorOutcome {
    pub records: usize,
    pub columns: usize,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionSummary {
    #[serde(flatten)]
    pub stats: ExtractionStats,
    pub results_count: usize,
    pub total_records: usize,
    pub extractors: BTreeMap<String, ExtractorOutcome>,
}

#[derive(Serialize)]
struct ExtractionLog<'a> {
    timestamp: DateTime<Utc>,
    summary: &'a ExtractionSummary,
}

/// Sequential extraction stage.
///
/// An extractor that errors or whose output fails validation is counted as
/// failed and skipped; the run always continues with the next extractor.
#[derive(Default)]
pub struct ExtractionOrchestrator {
    extractors: Vec<Box<dyn Extractor>>,
    results: Vec<(String, RecordBatch)>,
    stats: ExtractionStats,
}

impl ExtractionOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_extractor(&mut self, extractor: Box<dyn Extractor>) {
        tracing::info!(extractor = %extractor.name(), "Added extractor");
        self.extractors.push(extractor);
        self.stats.total_extractors = self.extractors.len();
    }

    pub fn extractor_count(&self) -> usize {
        self.extractors.len()
    }

    /// Run every extractor once, in insertion order.
    ///
    /// Returns the validated tables keyed by extractor name. A later extractor
    /// with the same name replaces the earlier result.
    pub async fn run_all_extractions(&mut self) -> &[(String, RecordBatch)] {
        tracing::info!(extractors = self.extractors.len(), "Starting extraction");
        let start = Utc::now();
        self.results.clear();
        self.stats = ExtractionStats {
            total_extractors: self.extractors.len(),
            start_time: Some(start),
            ..Default::default()
        };

        for extractor in &self.extractors {
            let name = extractor.name().to_string();
            tracing::info!(extractor = %name, "Running extractor");

            match extractor.extract().await {
                Ok(batch) if extractor.validate(&batch) => {
                    tracing::info!(
                        extractor = %name,
                        records = batch.row_count(),
                        "Extraction successful"
                    );
                    self.stats.successful_extractions += 1;
                    match self.results.iter_mut().find(|(n, _)| *n == name) {
                        Some(slot) => slot.1 = batch,
                        None => self.results.push((name, batch)),
                    }
                }
                Ok(_) => {
                    tracing::error!(extractor = %name, "Data validation failed");
                    self.stats.failed_extractions += 1;
                }
                Err(e) => {
                    tracing::error!(extractor = %name, error = %e, "Extraction failed");
                    self.stats.failed_extractions += 1;
                }
            }
        }

        let end = Utc::now();
        self.stats.end_time = Some(end);
        self.stats.duration_secs = Some((end - start).num_milliseconds() as f64 / 1000.0);
        tracing::info!(
            successful = self.stats.successful_extractions,
            failed = self.stats.failed_extractions,
            "Extraction completed"
        );
        &self.results
    }

    pub fn results(&self) -> &[(String, RecordBatch)] {
        &self.results
    }

    pub fn stats(&self) -> &ExtractionStats {
        &self.stats
    }

    /// Stack all successful results into one table.
    pub fn combine_results(&self) -> RecordBatch {
        if self.results.is_empty() {
            tracing::warn!("No extraction results to combine");
            return RecordBatch::empty();
        }
        let combined = RecordBatch::concat(self.results.iter().map(|(_, b)| b));
        tracing::info!(
            datasets = self.results.len(),
            records = combined.row_count(),
            "Combined extraction results"
        );
        combined
    }

    pub fn get_extraction_summary(&self) -> ExtractionSummary {
        ExtractionSummary {
            stats: self.stats.clone(),
            results_count: self.results.len(),
            total_records: self.results.iter().map(|(_, b)| b.row_count()).sum(),
            extractors: self
                .results
                .iter()
                .map(|(name, batch)| {
                    (
                        name.clone(),
                        ExtractorOutcome {
                            records: batch.row_count(),
                            columns: batch.column_count(),
                            success: true,
                        },
                    )
                })
                .collect(),
        }
    }

    /// Write `{YYYYmmdd_HHMMSS}_extraction_logs.json` into `dir`.
    pub fn save_extraction_logs(&self, dir: &Path) -> Result<PathBuf> {
        let now = Utc::now();
        let summary = self.get_extraction_summary();
        let path = dir.join(format!("{}_extraction_logs.json", now.format("%Y%m%d_%H%M%S")));
        atomic_write_json(
            &path,
            &ExtractionLog {
                timestamp: now,
                summary: &summary,
            },
        )?;
        tracing::info!(path = %path.display(), "Extraction logs saved");
        Ok(path)
    }

    /// Drop collected results and reset counters. Extractors stay registered.
    pub fn clear_results(&mut self) {
        self.results.clear();
        self.stats = ExtractionStats {
            total_extractors: self.extractors.len(),
            ..Default::default()
        };
        tracing::info!("Extraction results cleared");
    }
}
