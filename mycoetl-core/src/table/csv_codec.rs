//! CSV reading and writing for record batches.
//!
//! Cell types are inferred per column after reading: a column becomes integer,
//! float or boolean only when every non-missing cell parses as such, otherwise
//! it stays text.

use super::{RecordBatch, cell_to_string};
use crate::error::{EtlError, Result};
use serde_json::Value;
use std::io::{Read, Write};

/// Tokens read as missing values.
const NULL_TOKENS: &[&str] = &["", "NA", "N/A", "NaN", "nan", "null", "NULL", "None"];

/// Options for [`read_csv`].
#[derive(Debug, Clone)]
pub struct CsvReadOptions {
    pub delimiter: u8,
    /// Whether the first record holds column names.
    pub has_header: bool,
    /// Explicit column names. Required for headerless input unless positional
    /// `column_N` names are acceptable.
    pub column_names: Option<Vec<String>>,
}

impl Default for CsvReadOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_header: true,
            column_names: None,
        }
    }
}

/// Options for [`write_csv`].
#[derive(Debug, Clone)]
pub struct CsvWriteOptions {
    pub delimiter: u8,
    pub header: bool,
    /// Prepend an unnamed positional index column.
    pub index: bool,
}

impl Default for CsvWriteOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            header: true,
            index: false,
        }
    }
}

/// Parse CSV text into a batch.
pub fn read_csv<R: Read>(reader: R, options: &CsvReadOptions) -> Result<RecordBatch> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(options.delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);

    let mut records = rdr.records();
    let mut columns: Vec<String> = match (&options.column_names, options.has_header) {
        (Some(names), has_header) => {
            if has_header {
                // Header row present but overridden by explicit names.
                records.next().transpose()?;
            }
            names.clone()
        }
        (None, true) => match records.next().transpose()? {
            Some(header) => header.iter().map(|h| h.trim().to_string()).collect(),
            None => return Ok(RecordBatch::empty()),
        },
        (None, false) => Vec::new(),
    };

    let mut raw_rows: Vec<Vec<String>> = Vec::new();
    for record in records {
        let record = record?;
        raw_rows.push(record.iter().map(str::to_string).collect());
    }

    if options.column_names.is_none() && !options.has_header {
        let width = raw_rows.iter().map(Vec::len).max().unwrap_or(0);
        columns = (0..width).map(|i| format!("column_{i}")).collect();
    }

    let width = columns.len();
    for (idx, row) in raw_rows.iter_mut().enumerate() {
        if row.len() > width {
            return Err(EtlError::source(format!(
                "CSV line {} has {} fields, expected {width}",
                idx + 1,
                row.len()
            )));
        }
        row.resize(width, String::new());
    }

    let mut rows: Vec<Vec<Value>> = vec![Vec::with_capacity(width); raw_rows.len()];
    for col in 0..width {
        let parsed = parse_column(raw_rows.iter().map(|r| r[col].as_str()));
        for (row, value) in rows.iter_mut().zip(parsed) {
            row.push(value);
        }
    }

    RecordBatch::new(columns, rows)
}

fn is_null_token(s: &str) -> bool {
    NULL_TOKENS.contains(&s.trim())
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim() {
        "True" | "true" | "TRUE" => Some(true),
        "False" | "false" | "FALSE" => Some(false),
        _ => None,
    }
}

/// Infer the narrowest type that fits every non-missing cell of one column.
fn parse_column<'a>(cells: impl Iterator<Item = &'a str> + Clone) -> Vec<Value> {
    let present = cells.clone().filter(|c| !is_null_token(c));

    if present.clone().all(|c| c.trim().parse::<i64>().is_ok()) {
        return cells
            .map(|c| {
                c.trim()
                    .parse::<i64>()
                    .map(Value::from)
                    .unwrap_or(Value::Null)
            })
            .collect();
    }
    if present.clone().all(|c| c.trim().parse::<f64>().is_ok()) {
        return cells
            .map(|c| {
                c.trim()
                    .parse::<f64>()
                    .map(super::float_value)
                    .unwrap_or(Value::Null)
            })
            .collect();
    }
    if present.clone().all(|c| parse_bool(c).is_some()) {
        return cells
            .map(|c| parse_bool(c).map(Value::Bool).unwrap_or(Value::Null))
            .collect();
    }
    cells
        .map(|c| {
            if is_null_token(c) {
                Value::Null
            } else {
                Value::String(c.to_string())
            }
        })
        .collect()
}

/// Write a batch as CSV.
pub fn write_csv<W: Write>(
    batch: &RecordBatch,
    writer: W,
    options: &CsvWriteOptions,
) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(options.delimiter)
        .from_writer(writer);

    if options.header {
        let mut header: Vec<&str> = Vec::with_capacity(batch.column_count() + 1);
        if options.index {
            header.push("");
        }
        header.extend(batch.columns.iter().map(String::as_str));
        wtr.write_record(&header)?;
    }

    for (idx, row) in batch.rows.iter().enumerate() {
        let mut record: Vec<String> = Vec::with_capacity(row.len() + 1);
        if options.index {
            record.push(idx.to_string());
        }
        record.extend(row.iter().map(cell_to_string));
        wtr.write_record(&record)?;
    }

    wtr.flush()?;
    Ok(())
}
