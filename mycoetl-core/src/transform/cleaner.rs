//! Data cleaning: duplicates, missing values, outliers and text normalization.

use super::numeric::{mean, median, numeric_cells, quantile, std_dev};
use super::{Transformer, validate_output};
use crate::error::{EtlError, Result};
use crate::table::{ColumnType, RecordBatch, as_f64, cell_to_string, float_value};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// What to do with missing cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingStrategy {
    /// Drop sparse columns, then every row that still has a missing cell.
    #[default]
    Drop,
    /// Median for numeric columns, most frequent value otherwise.
    Fill,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutlierMethod {
    #[default]
    Iqr,
    Zscore,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanerConfig {
    #[serde(default)]
    pub handle_missing: MissingStrategy,
    /// Columns whose missing fraction exceeds this are dropped in `Drop` mode.
    #[serde(default = "default_missing_threshold")]
    pub missing_threshold: f64,
    #[serde(default)]
    pub outlier_method: OutlierMethod,
    /// Absolute z-score at or above which a row is an outlier.
    #[serde(default = "default_outlier_threshold")]
    pub outlier_threshold: f64,
    #[serde(default = "default_true")]
    pub standardize_text: bool,
    #[serde(default = "default_true")]
    pub remove_duplicates: bool,
}

fn default_missing_threshold() -> f64 {
    0.5
}

fn default_outlier_threshold() -> f64 {
    3.0
}

fn default_true() -> bool {
    true
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            handle_missing: MissingStrategy::default(),
            missing_threshold: default_missing_threshold(),
            outlier_method: OutlierMethod::default(),
            outlier_threshold: default_outlier_threshold(),
            standardize_text: true,
            remove_duplicates: true,
        }
    }
}

/// Counters from the last cleaning run. Shapes are `(rows, columns)`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleaningStats {
    pub original_shape: (usize, usize),
    pub original_missing: usize,
    pub original_duplicates: usize,
    pub duplicates_removed: usize,
    pub columns_dropped: usize,
    pub rows_dropped_missing: usize,
    pub outliers_removed: usize,
    pub text_columns_standardized: usize,
    pub final_shape: (usize, usize),
    pub final_missing: usize,
    pub records_removed: usize,
}

pub struct DataCleaner {
    config: CleanerConfig,
    stats: CleaningStats,
}

impl Default for DataCleaner {
    fn default() -> Self {
        Self::new(CleanerConfig::default())
    }
}

impl DataCleaner {
    pub const NAME: &'static str = "data_cleaner";

    pub fn new(config: CleanerConfig) -> Self {
        Self {
            config,
            stats: CleaningStats::default(),
        }
    }

    pub fn config(&self) -> &CleanerConfig {
        &self.config
    }

    pub fn cleaning_stats(&self) -> &CleaningStats {
        &self.stats
    }

    fn handle_missing(&self, mut data: RecordBatch, stats: &mut CleaningStats) -> RecordBatch {
        let missing_cols: Vec<usize> = (0..data.column_count())
            .filter(|&i| data.column_null_count(i) > 0)
            .collect();
        if missing_cols.is_empty() {
            return data;
        }
        tracing::info!(columns = missing_cols.len(), "Handling missing values");

        match self.config.handle_missing {
            MissingStrategy::Drop => {
                let rows = data.row_count() as f64;
                let sparse: Vec<String> = missing_cols
                    .iter()
                    .filter_map(|&i| {
                        let ratio = data.column_null_count(i) as f64 / rows;
                        (ratio > self.config.missing_threshold).then(|| {
                            tracing::warn!(
                                column = %data.columns[i],
                                missing_pct = %format!("{:.1}", ratio * 100.0),
                                "Dropping sparse column"
                            );
                            data.columns[i].clone()
                        })
                    })
                    .collect();
                let names: Vec<&str> = sparse.iter().map(String::as_str).collect();
                data = data.drop_columns(&names);
                stats.columns_dropped = sparse.len();

                let before = data.row_count();
                data.rows.retain(|row| row.iter().all(|v| !v.is_null()));
                stats.rows_dropped_missing = before - data.row_count();
            }
            MissingStrategy::Fill => {
                for col in missing_cols {
                    let fill = fill_value(&data, col);
                    for row in &mut data.rows {
                        if row[col].is_null() {
                            row[col] = fill.clone();
                        }
                    }
                }
            }
        }
        data
    }

    fn handle_outliers(&self, mut data: RecordBatch, stats: &mut CleaningStats) -> RecordBatch {
        if self.config.outlier_method == OutlierMethod::None {
            return data;
        }
        let numeric = data.numeric_columns();
        if numeric.is_empty() {
            return data;
        }
        tracing::info!(
            columns = numeric.len(),
            method = ?self.config.outlier_method,
            "Handling outliers"
        );

        let mut removed = 0;
        for col in numeric {
            let values: Vec<f64> = numeric_cells(&data, col).into_iter().map(|(_, v)| v).collect();
            let keep: Box<dyn Fn(f64) -> bool> = match self.config.outlier_method {
                OutlierMethod::Iqr => {
                    let (Some(q1), Some(q3)) = (quantile(&values, 0.25), quantile(&values, 0.75))
                    else {
                        continue;
                    };
                    let iqr = q3 - q1;
                    let (lo, hi) = (q1 - 1.5 * iqr, q3 + 1.5 * iqr);
                    Box::new(move |v| v >= lo && v <= hi)
                }
                OutlierMethod::Zscore => {
                    let (Some(m), Some(s)) = (mean(&values), std_dev(&values, 1)) else {
                        continue;
                    };
                    if s == 0.0 || !s.is_finite() {
                        tracing::debug!(
                            column = %data.columns[col],
                            "Zero variance, skipping z-score filter"
                        );
                        continue;
                    }
                    let threshold = self.config.outlier_threshold;
                    Box::new(move |v| ((v - m) / s).abs() < threshold)
                }
                OutlierMethod::None => continue,
            };

            let before = data.row_count();
            // Rows with a non-numeric cell in the column fail the bounds check.
            data.rows.retain(|row| as_f64(&row[col]).is_some_and(|v| keep(v)));
            removed += before - data.row_count();
        }
        stats.outliers_removed = removed;
        data
    }

    fn standardize_text(
        &self,
        mut data: RecordBatch,
        stats: &mut CleaningStats,
    ) -> Result<RecordBatch> {
        let whitespace = Regex::new(r"\s+").map_err(|e| EtlError::transform(e.to_string()))?;
        let text_cols = data.text_columns();
        for &col in &text_cols {
            for row in &mut data.rows {
                if let Value::String(s) = &mut row[col] {
                    let lowered = s.to_lowercase();
                    *s = whitespace.replace_all(lowered.trim(), " ").into_owned();
                }
            }
        }
        stats.text_columns_standardized = text_cols.len();
        tracing::info!(columns = text_cols.len(), "Standardized text columns");
        Ok(data)
    }
}

/// Keep the first occurrence of each distinct row.
fn drop_duplicates(data: &mut RecordBatch) -> usize {
    let before = data.row_count();
    let mut seen = HashSet::new();
    data.rows.retain(|row| seen.insert(RecordBatch::row_key(row)));
    before - data.row_count()
}

fn count_duplicates(data: &RecordBatch) -> usize {
    let mut seen = HashSet::new();
    data.rows
        .iter()
        .filter(|row| !seen.insert(RecordBatch::row_key(row)))
        .count()
}

/// Median for numeric columns; otherwise the most frequent value, ties broken
/// by the smallest rendered value, or `"Unknown"` when nothing is present.
fn fill_value(data: &RecordBatch, col: usize) -> Value {
    let dtype = data.column_type(col);
    if dtype.is_numeric() {
        let values: Vec<f64> = numeric_cells(data, col).into_iter().map(|(_, v)| v).collect();
        if let Some(m) = median(&values) {
            if dtype == ColumnType::Integer && m.fract() == 0.0 {
                return Value::from(m as i64);
            }
            return float_value(m);
        }
    }

    let mut counts: HashMap<String, (Value, usize)> = HashMap::new();
    for v in data.column(col).filter(|v| !v.is_null()) {
        counts
            .entry(RecordBatch::row_key(std::slice::from_ref(v)))
            .or_insert_with(|| (v.clone(), 0))
            .1 += 1;
    }
    counts
        .into_values()
        .max_by(|(a, ca), (b, cb)| {
            ca.cmp(cb)
                .then_with(|| cell_to_string(b).cmp(&cell_to_string(a)))
        })
        .map(|(v, _)| v)
        .unwrap_or_else(|| Value::String("Unknown".to_string()))
}

impl Transformer for DataCleaner {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn transform(&mut self, batch: &RecordBatch) -> Result<RecordBatch> {
        tracing::info!(records = batch.row_count(), "Starting data cleaning");
        let mut stats = CleaningStats {
            original_shape: (batch.row_count(), batch.column_count()),
            original_missing: batch.null_count(),
            original_duplicates: count_duplicates(batch),
            ..Default::default()
        };

        let mut data = batch.clone();
        if self.config.remove_duplicates {
            stats.duplicates_removed = drop_duplicates(&mut data);
            tracing::info!(removed = stats.duplicates_removed, "Removed duplicate rows");
        }
        data = self.handle_missing(data, &mut stats);
        data = self.handle_outliers(data, &mut stats);
        if self.config.standardize_text {
            data = self.standardize_text(data, &mut stats)?;
        }
        // Filling and case folding can turn distinct rows into duplicates.
        if self.config.remove_duplicates {
            let collapsed = drop_duplicates(&mut data);
            if collapsed > 0 {
                stats.duplicates_removed += collapsed;
                tracing::info!(removed = collapsed, "Removed rows made identical by cleaning");
            }
        }

        stats.final_shape = (data.row_count(), data.column_count());
        stats.final_missing = data.null_count();
        stats.records_removed = stats.original_shape.0.saturating_sub(stats.final_shape.0);
        tracing::info!(removed = stats.records_removed, "Data cleaning completed");
        self.stats = stats;
        Ok(data)
    }

    fn validate(&self, batch: &RecordBatch) -> bool {
        validate_output(Self::NAME, batch)
    }

    fn stats(&self) -> Value {
        serde_json::to_value(&self.stats).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn batch(columns: &[&str], rows: Vec<Vec<Value>>) -> RecordBatch {
        RecordBatch::new(columns.iter().map(|c| c.to_string()).collect(), rows).unwrap()
    }

    fn cleaner(config: CleanerConfig) -> DataCleaner {
        DataCleaner::new(config)
    }

    #[test]
    fn test_duplicates_keep_first() {
        let input = batch(
            &["class", "odor"],
            vec![
                vec![json!("e"), json!("n")],
                vec![json!("p"), json!("f")],
                vec![json!("e"), json!("n")],
            ],
        );
        let mut c = DataCleaner::default();
        let out = c.transform(&input).unwrap();
        assert_eq!(out.rows, vec![vec![json!("e"), json!("n")], vec![json!("p"), json!("f")]]);
        assert_eq!(c.cleaning_stats().duplicates_removed, 1);
        assert_eq!(c.cleaning_stats().original_duplicates, 1);
        assert_eq!(c.cleaning_stats().records_removed, 1);
    }

    #[test]
    fn test_case_variants_collapse_in_one_pass() {
        let input = batch(
            &["class", "odor"],
            vec![
                vec![json!("E"), json!("n")],
                vec![json!("e"), json!(" n ")],
                vec![json!("p"), json!("f")],
            ],
        );
        let mut c = DataCleaner::default();
        let once = c.transform(&input).unwrap();
        assert_eq!(once.rows, vec![vec![json!("e"), json!("n")], vec![json!("p"), json!("f")]]);
        assert_eq!(c.cleaning_stats().duplicates_removed, 1);

        let twice = c.transform(&once).unwrap();
        assert_eq!(twice, once);
        assert_eq!(c.cleaning_stats().duplicates_removed, 0);
    }

    #[test]
    fn test_drop_sparse_column_then_rows() {
        let input = batch(
            &["class", "sparse", "odor"],
            vec![
                vec![json!("e"), Value::Null, json!("n")],
                vec![json!("p"), Value::Null, Value::Null],
                vec![json!("e"), json!("x"), json!("a")],
            ],
        );
        let mut c = DataCleaner::default();
        let out = c.transform(&input).unwrap();
        assert_eq!(out.columns, vec!["class", "odor"]);
        assert_eq!(out.row_count(), 2);
        assert_eq!(c.cleaning_stats().columns_dropped, 1);
        assert_eq!(c.cleaning_stats().rows_dropped_missing, 1);
    }

    #[test]
    fn test_fill_median_and_mode() {
        let input = batch(
            &["width", "odor"],
            vec![
                vec![json!(1.0), json!("n")],
                vec![json!(3.0), json!("f")],
                vec![Value::Null, json!("f")],
                vec![json!(10.0), Value::Null],
            ],
        );
        let mut c = cleaner(CleanerConfig {
            handle_missing: MissingStrategy::Fill,
            outlier_method: OutlierMethod::None,
            ..Default::default()
        });
        let out = c.transform(&input).unwrap();
        assert_eq!(out.rows[2][0], json!(3.0));
        assert_eq!(out.rows[3][1], json!("f"));
        assert_eq!(out.null_count(), 0);
    }

    #[test]
    fn test_fill_mode_ties_pick_smallest() {
        let input = batch(&["odor"], vec![vec![json!("n")], vec![json!("a")], vec![Value::Null]]);
        assert_eq!(fill_value(&input, 0), json!("a"));
    }

    #[test]
    fn test_fill_all_missing_is_unknown() {
        let input = batch(&["odor"], vec![vec![Value::Null]]);
        assert_eq!(fill_value(&input, 0), json!("Unknown"));
    }

    #[test]
    fn test_iqr_removes_extreme_rows() {
        let mut rows: Vec<Vec<Value>> = (1..=8).map(|v| vec![json!(v)]).collect();
        rows.push(vec![json!(100)]);
        let input = batch(&["width"], rows);
        let mut c = DataCleaner::default();
        let out = c.transform(&input).unwrap();
        assert_eq!(out.row_count(), 8);
        assert_eq!(c.cleaning_stats().outliers_removed, 1);
    }

    #[test]
    fn test_zscore_skips_constant_columns() {
        let rows: Vec<Vec<Value>> = (0..5).map(|_| vec![json!(2.0)]).collect();
        let input = batch(&["width"], rows);
        let mut c = cleaner(CleanerConfig {
            outlier_method: OutlierMethod::Zscore,
            ..Default::default()
        });
        c.config.remove_duplicates = false;
        let out = c.transform(&input).unwrap();
        assert_eq!(out.row_count(), 5);
    }

    #[test]
    fn test_zscore_threshold() {
        let mut rows: Vec<Vec<Value>> =
            (0..20).map(|i| vec![json!(10.0 + (i % 2) as f64)]).collect();
        rows.push(vec![json!(1000.0)]);
        let input = batch(&["width"], rows);
        let mut c = cleaner(CleanerConfig {
            outlier_method: OutlierMethod::Zscore,
            remove_duplicates: false,
            ..Default::default()
        });
        let out = c.transform(&input).unwrap();
        assert_eq!(out.row_count(), 20);
    }

    #[test]
    fn test_standardize_text() {
        let input = batch(&["habitat"], vec![vec![json!("  Wood   LAND ")]]);
        let mut c = DataCleaner::default();
        let out = c.transform(&input).unwrap();
        assert_eq!(out.rows[0][0], json!("wood land"));
        assert_eq!(c.cleaning_stats().text_columns_standardized, 1);
    }

    #[test]
    fn test_input_is_not_mutated() {
        let input = batch(&["class"], vec![vec![json!("E")], vec![json!("E")]]);
        let snapshot = input.clone();
        DataCleaner::default().transform(&input).unwrap();
        assert_eq!(input, snapshot);
    }

    #[test]
    fn test_config_defaults_from_partial_toml() {
        let config: CleanerConfig = toml::from_str("handle_missing = \"fill\"").unwrap();
        assert_eq!(config.handle_missing, MissingStrategy::Fill);
        assert_eq!(config.missing_threshold, 0.5);
        assert_eq!(config.outlier_method, OutlierMethod::Iqr);
        assert!(config.remove_duplicates);
    }
}
