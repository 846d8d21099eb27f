//! Local file extractor.

use super::{ExtractionMetadata, Extractor, check_missing_ratio, save_extraction_metadata};
use crate::error::{EtlError, Result};
use crate::table::RecordBatch;
use crate::table::csv_codec::{CsvReadOptions, read_csv};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Supported input file formats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    #[default]
    Csv,
    Json,
    Excel,
    Parquet,
}

impl FileType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Excel => "excel",
            Self::Parquet => "parquet",
        }
    }

    /// Guess the type from a file extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "csv" | "txt" | "data" => Some(Self::Csv),
            "json" => Some(Self::Json),
            "xls" | "xlsx" => Some(Self::Excel),
            "parquet" => Some(Self::Parquet),
            _ => None,
        }
    }
}

impl std::str::FromStr for FileType {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "csv" => Ok(Self::Csv),
            "json" => Ok(Self::Json),
            "excel" | "xlsx" | "xls" => Ok(Self::Excel),
            "parquet" => Ok(Self::Parquet),
            other => Err(EtlError::unsupported(format!("file type '{other}'"))),
        }
    }
}

/// Reader options for [`FileExtractor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileExtractorConfig {
    pub file_path: PathBuf,
    #[serde(default)]
    pub file_type: FileType,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    #[serde(default = "default_true")]
    pub has_header: bool,
    /// Column names for headerless CSV.
    #[serde(default)]
    pub column_names: Option<Vec<String>>,
    /// Where to write the metadata sidecar. No sidecar when unset.
    #[serde(default)]
    pub metadata_dir: Option<PathBuf>,
}

fn default_delimiter() -> char {
    ','
}

fn default_true() -> bool {
    true
}

impl FileExtractorConfig {
    pub fn new(file_path: impl Into<PathBuf>, file_type: FileType) -> Self {
        Self {
            file_path: file_path.into(),
            file_type,
            delimiter: default_delimiter(),
            has_header: true,
            column_names: None,
            metadata_dir: None,
        }
    }
}

/// Reads a table from a local CSV or JSON file.
pub struct FileExtractor {
    name: String,
    config: FileExtractorConfig,
}

impl FileExtractor {
    pub fn new(config: FileExtractorConfig) -> Self {
        let stem = config
            .file_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("input");
        Self {
            name: format!("file_{stem}"),
            config,
        }
    }

    /// Extractor for `path`, typed from its extension (CSV when unknown).
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let file_type = FileType::from_path(&path).unwrap_or_default();
        Self::new(FileExtractorConfig::new(path, file_type))
    }

    pub fn with_metadata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.metadata_dir = Some(dir.into());
        self
    }

    pub fn config(&self) -> &FileExtractorConfig {
        &self.config
    }

    fn parse(&self, content: &[u8]) -> Result<RecordBatch> {
        match self.config.file_type {
            FileType::Csv => {
                let delimiter = u8::try_from(self.config.delimiter).map_err(|_| {
                    EtlError::invalid_input(format!(
                        "delimiter '{}' is not a single-byte character",
                        self.config.delimiter
                    ))
                })?;
                let options = CsvReadOptions {
                    delimiter,
                    has_header: self.config.has_header,
                    column_names: self.config.column_names.clone(),
                };
                read_csv(content, &options)
            }
            FileType::Json => {
                let value: Value = serde_json::from_slice(content)?;
                json_to_batch(value)
            }
            FileType::Excel | FileType::Parquet => Err(EtlError::unsupported(format!(
                "{} input is not supported; convert {} to CSV or JSON",
                self.config.file_type.as_str(),
                self.config.file_path.display()
            ))),
        }
    }
}

/// Convert a JSON document to a batch.
///
/// Accepts an array of records, a column-oriented object of arrays
/// (`{"col": [..]}`), or a column-oriented object keyed by row label
/// (`{"col": {"0": v}}`).
pub(crate) fn json_to_batch(value: Value) -> Result<RecordBatch> {
    match value {
        Value::Array(items) => RecordBatch::from_records(&items),
        Value::Object(map) => {
            if map.values().all(Value::is_array) {
                let columns: Vec<String> = map.keys().cloned().collect();
                let height = map
                    .values()
                    .filter_map(Value::as_array)
                    .map(Vec::len)
                    .max()
                    .unwrap_or(0);
                let rows = (0..height)
                    .map(|i| {
                        map.values()
                            .map(|col| {
                                col.as_array()
                                    .and_then(|a| a.get(i))
                                    .cloned()
                                    .unwrap_or(Value::Null)
                            })
                            .collect()
                    })
                    .collect();
                RecordBatch::new(columns, rows)
            } else if map.values().all(Value::is_object) {
                let columns: Vec<String> = map.keys().cloned().collect();
                let mut labels: Vec<String> = Vec::new();
                for col in map.values().filter_map(Value::as_object) {
                    for label in col.keys() {
                        if !labels.contains(label) {
                            labels.push(label.clone());
                        }
                    }
                }
                let rows = labels
                    .iter()
                    .map(|label| {
                        map.values()
                            .map(|col| col.get(label).cloned().unwrap_or(Value::Null))
                            .collect()
                    })
                    .collect();
                RecordBatch::new(columns, rows)
            } else {
                RecordBatch::from_records(&[Value::Object(map)])
            }
        }
        _ => Err(EtlError::source("JSON input must be an array or an object")),
    }
}

#[async_trait]
impl Extractor for FileExtractor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn extract(&self) -> Result<RecordBatch> {
        let path = &self.config.file_path;
        if !path.exists() {
            return Err(EtlError::not_found(format!("file not found: {}", path.display())));
        }
        tracing::info!(extractor = %self.name, path = %path.display(), "Extracting data from file");

        let content = tokio::fs::read(path).await?;
        let batch = self.parse(&content).inspect_err(|e| {
            tracing::error!(extractor = %self.name, error = %e, "File extraction failed");
        })?;

        if let Some(dir) = &self.config.metadata_dir {
            let mut metadata = ExtractionMetadata::new("file", &batch);
            metadata.file_path = Some(path.display().to_string());
            metadata.file_type = Some(self.config.file_type.as_str().to_string());
            save_extraction_metadata(dir, &self.name, &metadata)?;
        }

        tracing::info!(
            extractor = %self.name,
            records = batch.row_count(),
            "Extraction successful"
        );
        Ok(batch)
    }

    fn validate(&self, batch: &RecordBatch) -> bool {
        if batch.is_empty() {
            tracing::error!(extractor = %self.name, "Extracted table is empty");
            return false;
        }
        check_missing_ratio(&self.name, batch);
        tracing::info!(extractor = %self.name, "File data validation passed");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_name_uses_file_stem() {
        let extractor = FileExtractor::from_path("/data/in/mushrooms_2024.csv");
        assert_eq!(extractor.name(), "file_mushrooms_2024");
        assert_eq!(extractor.config().file_type, FileType::Csv);
    }

    #[tokio::test]
    async fn test_extract_csv_with_metadata() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sample.csv");
        std::fs::write(&path, "class,odor\ne,n\np,f\n").unwrap();

        let extractor = FileExtractor::from_path(&path).with_metadata_dir(dir.path());
        let batch = extractor.extract().await.unwrap();
        assert_eq!(batch.columns, vec!["class", "odor"]);
        assert_eq!(batch.row_count(), 2);
        assert!(extractor.validate(&batch));
        assert!(dir.path().join("file_sample_metadata.json").exists());
    }

    #[tokio::test]
    async fn test_extract_missing_file_is_not_found() {
        let extractor = FileExtractor::from_path("/nonexistent/mycoetl/input.csv");
        let err = extractor.extract().await.unwrap_err();
        assert!(matches!(err, EtlError::NotFound(_)));
        assert!(err.is_source_error());
    }

    #[tokio::test]
    async fn test_extract_parquet_is_unsupported() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("frame.parquet");
        std::fs::write(&path, b"PAR1").unwrap();
        let err = FileExtractor::from_path(&path).extract().await.unwrap_err();
        assert!(matches!(err, EtlError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_json_records() {
        let batch = json_to_batch(json!([{"class": "e"}, {"class": "p", "odor": "f"}])).unwrap();
        assert_eq!(batch.columns, vec!["class", "odor"]);
        assert_eq!(batch.rows[0][1], Value::Null);
    }

    #[test]
    fn test_json_column_arrays() {
        let batch = json_to_batch(json!({"class": ["e", "p"], "odor": ["n", "f"]})).unwrap();
        assert_eq!(batch.rows, vec![vec![json!("e"), json!("n")], vec![json!("p"), json!("f")]]);
    }

    #[test]
    fn test_json_column_objects() {
        let batch =
            json_to_batch(json!({"class": {"0": "e", "1": "p"}, "odor": {"1": "f"}})).unwrap();
        assert_eq!(batch.row_count(), 2);
        assert_eq!(batch.rows[0], vec![json!("e"), Value::Null]);
        assert_eq!(batch.rows[1], vec![json!("p"), json!("f")]);
    }

    #[test]
    fn test_validate_empty_is_false() {
        let extractor = FileExtractor::from_path("x.csv");
        let no_rows = RecordBatch::new(vec!["class".into()], vec![]).unwrap();
        assert!(!extractor.validate(&no_rows));
    }
}
