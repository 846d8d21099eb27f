//! Chains transformers: each successful output feeds the next transformer.

use super::Transformer;
use crate::error::Result;
use crate::persistence::atomic_write;
use crate::table::RecordBatch;
use crate::table::csv_codec::{CsvWriteOptions, write_csv};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformerOutcome {
    pub records: usize,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationSummary {
    pub total_transformers: usize,
    pub successful_transformations: usize,
    pub failed_transformations: usize,
    pub total_records: usize,
    pub transformers: BTreeMap<String, TransformerOutcome>,
}

/// Sequential transformation stage.
///
/// A transformer that errors or produces output that fails its own
/// validation is skipped, and the next one receives the previous table.
#[derive(Default)]
pub struct TransformationPipeline {
    transformers: Vec<Box<dyn Transformer>>,
    results: Vec<(String, RecordBatch)>,
}

impl TransformationPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_transformer(&mut self, transformer: Box<dyn Transformer>) {
        tracing::info!(transformer = %transformer.name(), "Added transformer");
        self.transformers.push(transformer);
    }

    pub fn transformer_count(&self) -> usize {
        self.transformers.len()
    }

    /// Run every transformer in order and return the final table.
    ///
    /// The final table is the output of the last successful transformer, or a
    /// copy of the input when none succeeded.
    pub fn run_transformations(&mut self, batch: &RecordBatch) -> RecordBatch {
        tracing::info!(records = batch.row_count(), "Starting transformation pipeline");
        self.results.clear();
        let mut current = batch.clone();

        for transformer in &mut self.transformers {
            let name = transformer.name().to_string();
            tracing::info!(transformer = %name, "Running transformer");
            match transformer.transform(&current) {
                Ok(output) if transformer.validate(&output) => {
                    tracing::info!(
                        transformer = %name,
                        input = ?(current.row_count(), current.column_count()),
                        output = ?(output.row_count(), output.column_count()),
                        "Transformation successful"
                    );
                    current = output.clone();
                    self.results.push((name, output));
                }
                Ok(_) => tracing::error!(transformer = %name, "Validation failed"),
                Err(e) => tracing::error!(transformer = %name, error = %e, "Transformation failed"),
            }
        }

        tracing::info!(
            successful = self.results.len(),
            failed = self.transformers.len() - self.results.len(),
            "Transformation pipeline completed"
        );
        current
    }

    pub fn results(&self) -> &[(String, RecordBatch)] {
        &self.results
    }

    pub fn last_result(&self) -> Option<&RecordBatch> {
        self.results.last().map(|(_, b)| b)
    }

    pub fn successful_count(&self) -> usize {
        self.results.len()
    }

    pub fn get_transformation_summary(&self) -> TransformationSummary {
        TransformationSummary {
            total_transformers: self.transformers.len(),
            successful_transformations: self.results.len(),
            failed_transformations: self.transformers.len().saturating_sub(self.results.len()),
            total_records: self.results.iter().map(|(_, b)| b.row_count()).sum(),
            transformers: self
                .results
                .iter()
                .map(|(name, batch)| {
                    (
                        name.clone(),
                        TransformerOutcome {
                            records: batch.row_count(),
                            columns: batch.columns.clone(),
                        },
                    )
                })
                .collect(),
        }
    }

    /// Statistics reported by every registered transformer, keyed by name.
    pub fn get_transformer_stats(&self) -> BTreeMap<String, serde_json::Value> {
        self.transformers
            .iter()
            .map(|t| (t.name().to_string(), t.stats()))
            .collect()
    }

    /// Write the final table to `dir/output_file` and each transformer's
    /// output to `dir/{name}_output.csv`. Returns the written paths.
    pub fn save_combined_data(&self, dir: &Path, output_file: &str) -> Result<Vec<PathBuf>> {
        let Some(last) = self.last_result() else {
            tracing::warn!("No transformation results to save");
            return Ok(Vec::new());
        };

        let mut written = Vec::with_capacity(self.results.len() + 1);
        let final_path = dir.join(output_file);
        write_table(&final_path, last)?;
        tracing::info!(path = %final_path.display(), "Final transformed data saved");
        written.push(final_path);

        for (name, batch) in &self.results {
            let path = dir.join(format!("{name}_output.csv"));
            write_table(&path, batch)?;
            tracing::info!(
                transformer = %name,
                path = %path.display(),
                "Transformation output saved"
            );
            written.push(path);
        }
        Ok(written)
    }
}

fn write_table(path: &Path, batch: &RecordBatch) -> Result<()> {
    let mut buf = Vec::new();
    write_csv(batch, &mut buf, &CsvWriteOptions::default())?;
    atomic_write(path, &buf)
}
