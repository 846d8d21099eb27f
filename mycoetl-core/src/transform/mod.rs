//! Transformation: cleaning and feature engineering over record batches.

pub mod cleaner;
pub mod features;
pub(crate) mod numeric;
pub mod pipeline;

pub use cleaner::{CleanerConfig, CleaningStats, DataCleaner, MissingStrategy, OutlierMethod};
pub use features::{CategoricalEncoding, FeatureConfig, FeatureEngineer, FeatureStats};
pub use pipeline::{TransformationPipeline, TransformationSummary, TransformerOutcome};

use crate::error::Result;
use crate::persistence::atomic_write_json;
use crate::table::RecordBatch;
use std::path::{Path, PathBuf};

/// A step that turns one table into another.
///
/// Implementations take the input by reference and return a new batch; they
/// may keep fitted state and statistics from the last call.
pub trait Transformer: Send {
    fn name(&self) -> &str;

    fn transform(&mut self, batch: &RecordBatch) -> Result<RecordBatch>;

    /// Decide whether a transformed table is usable. Never fails.
    fn validate(&self, batch: &RecordBatch) -> bool;

    /// Statistics from the most recent `transform` call.
    fn stats(&self) -> serde_json::Value;
}

/// Write a transformer's statistics to `{dir}/{name}_stats.json`.
pub fn save_stats(transformer: &dyn Transformer, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(format!("{}_stats.json", transformer.name()));
    atomic_write_json(&path, &transformer.stats())?;
    tracing::info!(transformer = %transformer.name(), path = %path.display(), "Stats saved");
    Ok(path)
}

/// Shared validation: reject empty output, warn about remaining nulls.
pub(crate) fn validate_output(name: &str, batch: &RecordBatch) -> bool {
    if batch.column_count() == 0 {
        tracing::error!(transformer = %name, "No columns remaining");
        return false;
    }
    if batch.row_count() == 0 {
        tracing::error!(transformer = %name, "Transformed data is empty");
        return false;
    }
    let nulls = batch.null_count();
    if nulls > 0 {
        tracing::warn!(
            transformer = %name,
            missing_values = nulls,
            "Found remaining missing values"
        );
    }
    tracing::info!(transformer = %name, "Validation passed");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_save_stats_file_name() {
        let dir = TempDir::new().unwrap();
        let mut cleaner = DataCleaner::default();
        let batch = RecordBatch::new(vec!["class".into()], vec![vec![json!("e")]]).unwrap();
        cleaner.transform(&batch).unwrap();

        let path = save_stats(&cleaner, dir.path()).unwrap();
        assert!(path.ends_with("data_cleaner_stats.json"));
        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(raw["final_shape"], json!([1, 1]));
    }

    #[test]
    fn test_validate_output() {
        assert!(!validate_output("t", &RecordBatch::empty()));
        let no_rows = RecordBatch::new(vec!["a".into()], vec![]).unwrap();
        assert!(!validate_output("t", &no_rows));
        let ok = RecordBatch::new(vec!["a".into()], vec![vec![serde_json::Value::Null]]).unwrap();
        assert!(validate_output("t", &ok));
    }
}
