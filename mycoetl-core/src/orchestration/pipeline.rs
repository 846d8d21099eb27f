//! The three-stage ETL run.

use super::types::{PipelineHealth, PipelineStats, PipelineStatus, Stage, StageReport};
use crate::error::Result;
use crate::extract::{ExtractionOrchestrator, Extractor};
use crate::load::{Loader, LoadingPipeline};
use crate::persistence::{atomic_write_json, latest_with_suffix, load_json};
use crate::table::RecordBatch;
use crate::transform::{TransformationPipeline, Transformer};
use chrono::Utc;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const LOG_SUFFIX: &str = "_pipeline_logs.json";

/// Composes one orchestrator per stage and runs them in order.
///
/// The first stage with no successful component fails the run; later stages
/// are skipped and nothing already loaded is rolled back.
pub struct EtlPipeline {
    extraction: ExtractionOrchestrator,
    transformation: TransformationPipeline,
    loading: LoadingPipeline,
    destinations: Option<HashMap<String, String>>,
    log_dir: Option<PathBuf>,
    stats: PipelineStats,
}

impl Default for EtlPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl EtlPipeline {
    pub fn new() -> Self {
        let pipeline_id = format!("etl_{}", Utc::now().format("%Y%m%d_%H%M%S"));
        Self {
            extraction: ExtractionOrchestrator::new(),
            transformation: TransformationPipeline::new(),
            loading: LoadingPipeline::new(),
            destinations: None,
            log_dir: None,
            stats: PipelineStats::new(pipeline_id),
        }
    }

    /// Write the run log to `dir` when the run ends.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Per-loader destination overrides, keyed by loader name.
    pub fn with_destinations(mut self, destinations: HashMap<String, String>) -> Self {
        self.destinations = Some(destinations);
        self
    }

    pub fn pipeline_id(&self) -> &str {
        &self.stats.pipeline_id
    }

    pub fn configure_extraction(&mut self, extractors: Vec<Box<dyn Extractor>>) {
        let count = extractors.len();
        for extractor in extractors {
            self.extraction.add_extractor(extractor);
        }
        tracing::info!(count, "Configured extractors");
    }

    pub fn configure_transformation(&mut self, transformers: Vec<Box<dyn Transformer>>) {
        let count = transformers.len();
        for transformer in transformers {
            self.transformation.add_transformer(transformer);
        }
        tracing::info!(count, "Configured transformers");
    }

    pub fn configure_loading(&mut self, loaders: Vec<Box<dyn Loader>>) {
        let count = loaders.len();
        for loader in loaders {
            self.loading.add_loader(loader);
        }
        tracing::info!(count, "Configured loaders");
    }

    pub fn extraction(&self) -> &ExtractionOrchestrator {
        &self.extraction
    }

    pub fn transformation(&self) -> &TransformationPipeline {
        &self.transformation
    }

    pub fn loading(&self) -> &LoadingPipeline {
        &self.loading
    }

    /// Run extraction, transformation and loading. Returns true only when all
    /// three stages succeeded.
    pub async fn run_pipeline(&mut self) -> bool {
        tracing::info!(pipeline_id = %self.stats.pipeline_id, "Starting ETL pipeline");
        let started = Utc::now();
        self.stats.start_time = Some(started);
        self.stats.end_time = None;
        self.stats.duration_secs = None;
        self.stats.error = None;
        self.stats.stages.clear();
        self.stats.status = PipelineStatus::Running;

        let success = self.run_stages().await;
        self.stats.status = if success {
            PipelineStatus::Completed
        } else {
            PipelineStatus::Failed
        };

        let ended = Utc::now();
        self.stats.end_time = Some(ended);
        self.stats.duration_secs = Some((ended - started).num_milliseconds() as f64 / 1000.0);

        if success {
            tracing::info!(
                pipeline_id = %self.stats.pipeline_id,
                duration_secs = self.stats.duration_secs,
                "ETL pipeline completed successfully"
            );
        } else {
            tracing::error!(
                pipeline_id = %self.stats.pipeline_id,
                error = self.stats.error.as_deref().unwrap_or("unknown"),
                "ETL pipeline failed"
            );
        }

        if let Some(dir) = self.log_dir.clone() {
            if let Err(e) = self.save_pipeline_logs(&dir) {
                tracing::warn!(error = %e, "Failed to save pipeline logs");
            }
        }
        success
    }

    async fn run_stages(&mut self) -> bool {
        let Some(combined) = self.run_extraction_stage().await else {
            return false;
        };
        let Some(transformed) = self.run_transformation_stage(&combined) else {
            return false;
        };
        self.run_loading_stage(&transformed)
    }

    fn record(&mut self, stage: Stage, report: StageReport) -> bool {
        let success = report.success;
        if let Some(error) = report.error.as_ref().filter(|_| !success) {
            tracing::error!(stage = %stage, error = %error, "Stage failed");
            self.stats.error = Some(format!("{stage} stage failed: {error}"));
        } else {
            tracing::info!(stage = %stage, records = report.output_records, "Stage completed");
        }
        self.stats.stages.insert(stage, report);
        success
    }

    async fn run_extraction_stage(&mut self) -> Option<RecordBatch> {
        tracing::info!("Starting extraction stage");
        let total = self.extraction.extractor_count();
        let succeeded = self.extraction.run_all_extractions().await.len();
        if succeeded == 0 {
            self.record(Stage::Extraction, StageReport::failed("No data extracted", total));
            return None;
        }

        let combined = self.extraction.combine_results();
        let summary = serde_json::to_value(self.extraction.get_extraction_summary())
            .unwrap_or(serde_json::Value::Null);
        self.record(
            Stage::Extraction,
            StageReport {
                success: true,
                error: None,
                components_total: total,
                components_succeeded: succeeded,
                input_records: 0,
                output_records: combined.row_count(),
                summary,
            },
        );
        Some(combined)
    }

    fn run_transformation_stage(&mut self, input: &RecordBatch) -> Option<RecordBatch> {
        tracing::info!("Starting transformation stage");
        let total = self.transformation.transformer_count();
        let output = self.transformation.run_transformations(input);
        let succeeded = self.transformation.successful_count();

        let error = if succeeded == 0 {
            Some("No transformer succeeded")
        } else if output.is_empty() {
            Some("Transformation produced empty data")
        } else {
            None
        };
        let summary = serde_json::to_value(self.transformation.get_transformation_summary())
            .unwrap_or(serde_json::Value::Null);
        let report = StageReport {
            success: error.is_none(),
            error: error.map(str::to_string),
            components_total: total,
            components_succeeded: succeeded,
            input_records: input.row_count(),
            output_records: output.row_count(),
            summary,
        };
        self.record(Stage::Transformation, report).then_some(output)
    }

    fn run_loading_stage(&mut self, input: &RecordBatch) -> bool {
        tracing::info!("Starting loading stage");
        let total = self.loading.loader_count();
        let success = self.loading.run_loadings(input, self.destinations.as_ref());
        let summary = self.loading.get_loading_summary();
        let report = StageReport {
            success,
            error: (!success).then(|| "No loader succeeded".to_string()),
            components_total: total,
            components_succeeded: summary.successful_loadings,
            input_records: input.row_count(),
            output_records: if success { input.row_count() } else { 0 },
            summary: serde_json::to_value(summary).unwrap_or(serde_json::Value::Null),
        };
        self.record(Stage::Loading, report)
    }

    pub fn get_pipeline_stats(&self) -> &PipelineStats {
        &self.stats
    }

    /// Write the run log to `{dir}/{pipeline_id}_pipeline_logs.json`.
    pub fn save_pipeline_logs(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(format!("{}{LOG_SUFFIX}", self.stats.pipeline_id));
        atomic_write_json(&path, &self.stats)?;
        tracing::info!(path = %path.display(), "Pipeline logs saved");
        Ok(path)
    }

    pub fn get_pipeline_health(&self) -> PipelineHealth {
        PipelineHealth::from(&self.stats)
    }
}

/// The most recently written run log in `dir`, if any.
pub fn load_latest_pipeline_logs(dir: &Path) -> Result<Option<PipelineStats>> {
    match latest_with_suffix(dir, LOG_SUFFIX)? {
        Some(path) => load_json(&path),
        None => Ok(None),
    }
}
