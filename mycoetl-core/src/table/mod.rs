//! In-memory tabular data passed between pipeline stages.

pub mod csv_codec;
pub mod schema;

pub use schema::{ColumnSchema, ColumnType, SchemaDefinition, infer_column_type, infer_schema};

use crate::error::{EtlError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;

/// A batch of rows with named columns.
///
/// Cells are JSON values; `Value::Null` marks a missing value. Stages take a
/// batch by reference and return a new one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordBatch {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl RecordBatch {
    /// Build a batch, checking that every row matches the column count.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        if let Some((idx, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(EtlError::invalid_input(format!(
                "row {idx} has {} values, expected {}",
                row.len(),
                columns.len()
            )));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = columns.iter().find(|c| !seen.insert(c.as_str())) {
            return Err(EtlError::invalid_input(format!("duplicate column '{dup}'")));
        }
        Ok(Self { columns, rows })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    /// True when the batch has no rows or no columns.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.columns.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Values of the column at `idx`, top to bottom.
    pub fn column(&self, idx: usize) -> impl Iterator<Item = &Value> {
        self.rows.iter().map(move |row| &row[idx])
    }

    pub fn column_type(&self, idx: usize) -> ColumnType {
        infer_column_type(self.column(idx))
    }

    pub fn schema(&self) -> SchemaDefinition {
        infer_schema(&self.columns, &self.rows)
    }

    /// Column names paired with their inferred dtype label.
    pub fn dtypes(&self) -> Vec<(String, &'static str)> {
        (0..self.columns.len())
            .map(|i| (self.columns[i].clone(), self.column_type(i).dtype_name()))
            .collect()
    }

    /// Indices of integer and float columns. Boolean indicators are excluded.
    pub fn numeric_columns(&self) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|&i| self.column_type(i).is_numeric())
            .collect()
    }

    /// Indices of string columns.
    pub fn text_columns(&self) -> Vec<usize> {
        (0..self.columns.len())
            .filter(|&i| self.column_type(i) == ColumnType::String)
            .collect()
    }

    pub fn column_null_count(&self, idx: usize) -> usize {
        self.column(idx).filter(|v| v.is_null()).count()
    }

    /// Total number of missing cells.
    pub fn null_count(&self) -> usize {
        self.rows
            .iter()
            .map(|row| row.iter().filter(|v| v.is_null()).count())
            .sum()
    }

    /// Missing cells as a fraction of all cells; 0.0 for an empty batch.
    pub fn missing_ratio(&self) -> f64 {
        let cells = self.row_count() * self.column_count();
        if cells == 0 {
            return 0.0;
        }
        self.null_count() as f64 / cells as f64
    }

    /// Keep only the columns at `indices`, in that order.
    pub fn select_columns(&self, indices: &[usize]) -> RecordBatch {
        RecordBatch {
            columns: indices.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| indices.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        }
    }

    /// Copy of the batch without the named columns. Unknown names are ignored.
    pub fn drop_columns(&self, names: &[&str]) -> RecordBatch {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&i| !names.contains(&self.columns[i].as_str()))
            .collect();
        self.select_columns(&keep)
    }

    /// Append a column. `values` must have one entry per row.
    pub fn push_column(&mut self, name: impl Into<String>, values: Vec<Value>) -> Result<()> {
        let name = name.into();
        if values.len() != self.rows.len() {
            return Err(EtlError::invalid_input(format!(
                "column '{name}' has {} values, expected {}",
                values.len(),
                self.rows.len()
            )));
        }
        if self.has_column(&name) {
            return Err(EtlError::invalid_input(format!("duplicate column '{name}'")));
        }
        self.columns.push(name);
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
        Ok(())
    }

    /// Stack batches row-wise.
    ///
    /// The result carries the union of all columns in first-seen order;
    /// columns absent from a batch are filled with nulls. Types are not
    /// reconciled.
    pub fn concat<'a>(batches: impl IntoIterator<Item = &'a RecordBatch>) -> RecordBatch {
        let batches: Vec<&RecordBatch> = batches.into_iter().collect();
        let mut columns: Vec<String> = Vec::new();
        for batch in &batches {
            for col in &batch.columns {
                if !columns.contains(col) {
                    columns.push(col.clone());
                }
            }
        }

        let mut rows = Vec::with_capacity(batches.iter().map(|b| b.row_count()).sum());
        for batch in &batches {
            let mapping: Vec<Option<usize>> =
                columns.iter().map(|c| batch.column_index(c)).collect();
            for row in &batch.rows {
                rows.push(
                    mapping
                        .iter()
                        .map(|m| m.map_or(Value::Null, |i| row[i].clone()))
                        .collect(),
                );
            }
        }

        RecordBatch { columns, rows }
    }

    /// Convert a list of JSON objects into a batch.
    ///
    /// Columns follow first-seen key order across all records; keys missing
    /// from a record become nulls.
    pub fn from_records(records: &[Value]) -> Result<RecordBatch> {
        let mut columns: Vec<String> = Vec::new();
        for record in records {
            let obj = record.as_object().ok_or_else(|| {
                EtlError::invalid_input("expected a JSON object for every record")
            })?;
            for key in obj.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }

        let rows = records
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|c| record.get(c).cloned().unwrap_or(Value::Null))
                    .collect()
            })
            .collect();
        Ok(RecordBatch { columns, rows })
    }

    /// Rows as JSON objects in column order.
    pub fn to_records(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let map: Map<String, Value> = self
                    .columns
                    .iter()
                    .cloned()
                    .zip(row.iter().cloned())
                    .collect();
                Value::Object(map)
            })
            .collect()
    }

    /// Row-level identity key, used for duplicate detection.
    pub(crate) fn row_key(row: &[Value]) -> String {
        serde_json::to_string(row).unwrap_or_default()
    }
}

/// Numeric view of a cell. Booleans and strings are not numeric.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

/// JSON number for `f`; non-finite values become null.
pub fn float_value(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Render a cell as text the way flat files store it.
pub fn cell_to_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "True".to_string(),
        Value::Bool(false) => "False".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sample() -> RecordBatch {
        RecordBatch::new(
            vec!["class".into(), "odor".into(), "width".into()],
            vec![
                vec![json!("e"), json!("n"), json!(1.5)],
                vec![json!("p"), Value::Null, json!(2)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_new_rejects_ragged_rows() {
        let result = RecordBatch::new(vec!["a".into()], vec![vec![json!(1), json!(2)]]);
        assert!(matches!(result, Err(EtlError::InvalidInput(_))));
    }

    #[test]
    fn test_new_rejects_duplicate_columns() {
        let result = RecordBatch::new(vec!["a".into(), "a".into()], vec![]);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_semantics() {
        assert!(RecordBatch::empty().is_empty());
        let no_rows = RecordBatch::new(vec!["a".into()], vec![]).unwrap();
        assert!(no_rows.is_empty());
        assert!(!sample().is_empty());
    }

    #[test]
    fn test_missing_ratio() {
        let batch = sample();
        assert_eq!(batch.null_count(), 1);
        assert!((batch.missing_ratio() - 1.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_numeric_and_text_columns() {
        let batch = sample();
        assert_eq!(batch.numeric_columns(), vec![2]);
        assert_eq!(batch.text_columns(), vec![0, 1]);
    }

    #[test]
    fn test_drop_columns() {
        let dropped = sample().drop_columns(&["odor", "missing"]);
        assert_eq!(dropped.columns, vec!["class", "width"]);
        assert_eq!(dropped.rows[1], vec![json!("p"), json!(2)]);
    }

    #[test]
    fn test_concat_unions_columns() {
        let a = RecordBatch::new(vec!["class".into()], vec![vec![json!("e")]]).unwrap();
        let b = RecordBatch::new(
            vec!["odor".into(), "class".into()],
            vec![vec![json!("f"), json!("p")]],
        )
        .unwrap();
        let combined = RecordBatch::concat([&a, &b]);
        assert_eq!(combined.columns, vec!["class", "odor"]);
        assert_eq!(
            combined.rows,
            vec![vec![json!("e"), Value::Null], vec![json!("p"), json!("f")]]
        );
    }

    #[test]
    fn test_from_records_first_seen_order() {
        let records = vec![json!({"b": 1, "a": 2}), json!({"a": 3, "c": "x"})];
        let batch = RecordBatch::from_records(&records).unwrap();
        assert_eq!(batch.columns, vec!["b", "a", "c"]);
        assert_eq!(batch.rows[1], vec![Value::Null, json!(3), json!("x")]);
        assert_eq!(batch.to_records()[1]["c"], json!("x"));
    }

    #[test]
    fn test_push_column_length_checked() {
        let mut batch = sample();
        assert!(batch.push_column("extra", vec![json!(1)]).is_err());
        batch.push_column("extra", vec![json!(1), json!(2)]).unwrap();
        assert_eq!(batch.column_count(), 4);
    }

    #[test]
    fn test_cell_rendering() {
        assert_eq!(cell_to_string(&json!(true)), "True");
        assert_eq!(cell_to_string(&Value::Null), "");
        assert_eq!(cell_to_string(&json!(2.5)), "2.5");
        assert_eq!(float_value(f64::NAN), Value::Null);
    }
}
