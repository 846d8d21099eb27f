//! Flat-file loader (CSV, JSON records), with optional gzip and a metadata
//! sidecar.

use super::{Loader, validate_for_load};
use crate::error::{EtlError, Result};
use crate::persistence::{atomic_write, atomic_write_json, hash_file, load_json};
use crate::table::RecordBatch;
use crate::table::csv_codec::{CsvWriteOptions, write_csv};
use chrono::{DateTime, Utc};
use flate2::Compression as GzLevel;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Formats this loader can write.
const WRITABLE_FORMATS: [&str; 2] = ["csv", "json"];

/// Excel's per-cell character limit.
const EXCEL_CELL_LIMIT: usize = 32_767;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileLoaderConfig {
    /// `csv`, `json`, `parquet` or `excel`; anything else is written as CSV.
    #[serde(default = "default_format")]
    pub file_format: String,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default)]
    pub index: bool,
    #[serde(default = "default_true")]
    pub header: bool,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default = "default_true")]
    pub save_metadata: bool,
}

fn default_format() -> String {
    "csv".to_string()
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("data/processed")
}

fn default_true() -> bool {
    true
}

impl Default for FileLoaderConfig {
    fn default() -> Self {
        Self {
            file_format: default_format(),
            output_dir: default_output_dir(),
            index: false,
            header: true,
            compression: Compression::None,
            save_metadata: true,
        }
    }
}

impl FileLoaderConfig {
    pub fn new(file_format: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            file_format: file_format.into(),
            output_dir: output_dir.into(),
            ..Self::default()
        }
    }
}

/// Sidecar describing a written data file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_path: String,
    pub file_format: String,
    pub records_count: usize,
    pub columns: Vec<String>,
    pub dtypes: BTreeMap<String, String>,
    pub file_size: u64,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

/// What [`FileLoader::get_file_info`] knows about a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileInfo {
    Metadata(FileMetadata),
    Basic {
        file_path: String,
        file_size: u64,
        exists: bool,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FileLoadStats {
    pub records_loaded: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub file_format: String,
    pub columns: Vec<String>,
    pub loading_successful: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Path of the metadata sidecar for `data_file`: the full file name plus
/// `.meta.json`, so it never lands on another loader's data file.
pub fn metadata_path(data_file: &Path) -> PathBuf {
    let name = data_file
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("data");
    data_file.with_file_name(format!("{name}.meta.json"))
}

pub struct FileLoader {
    config: FileLoaderConfig,
    stats: FileLoadStats,
}

impl Default for FileLoader {
    fn default() -> Self {
        Self::new(FileLoaderConfig::default())
    }
}

impl FileLoader {
    pub const NAME: &'static str = "file_loader";

    pub fn new(config: FileLoaderConfig) -> Self {
        Self {
            config,
            stats: FileLoadStats::default(),
        }
    }

    pub fn config(&self) -> &FileLoaderConfig {
        &self.config
    }

    pub fn load_stats(&self) -> &FileLoadStats {
        &self.stats
    }

    pub fn get_supported_formats(&self) -> Vec<&'static str> {
        WRITABLE_FORMATS.to_vec()
    }

    fn default_file_name(&self) -> String {
        let mut name = format!("loaded_data.{}", self.config.file_format);
        if self.config.compression == Compression::Gzip {
            name.push_str(".gz");
        }
        name
    }

    fn encode(&self, batch: &RecordBatch) -> Result<Vec<u8>> {
        match self.config.file_format.as_str() {
            "parquet" | "excel" => Err(EtlError::unsupported(format!(
                "{} output is not available; use csv or json",
                self.config.file_format
            ))),
            "json" => {
                if self.config.compression != Compression::None {
                    tracing::warn!(loader = Self::NAME, "Compression ignored for json output");
                }
                Ok(serde_json::to_vec(&batch.to_records())?)
            }
            other => {
                if other != "csv" {
                    tracing::warn!(format = %other, "Unknown file format, writing csv");
                }
                let mut buf = Vec::new();
                let options = CsvWriteOptions {
                    header: self.config.header,
                    index: self.config.index,
                    ..CsvWriteOptions::default()
                };
                write_csv(batch, &mut buf, &options)?;
                match self.config.compression {
                    Compression::None => Ok(buf),
                    Compression::Gzip => {
                        let mut encoder = GzEncoder::new(Vec::new(), GzLevel::default());
                        encoder.write_all(&buf)?;
                        Ok(encoder.finish()?)
                    }
                }
            }
        }
    }

    fn save_metadata(&self, batch: &RecordBatch, path: &Path) -> Result<PathBuf> {
        let metadata = FileMetadata {
            file_path: path.display().to_string(),
            file_format: self.config.file_format.clone(),
            records_count: batch.row_count(),
            columns: batch.columns.clone(),
            dtypes: batch
                .dtypes()
                .into_iter()
                .map(|(c, t)| (c, t.to_string()))
                .collect(),
            file_size: std::fs::metadata(path).map(|m| m.len()).unwrap_or(0),
            sha256: hash_file(path)?,
            created_at: Utc::now(),
        };
        let sidecar = metadata_path(path);
        atomic_write_json(&sidecar, &metadata)?;
        Ok(sidecar)
    }

    /// Describe a previously written file, preferring its sidecar.
    pub fn get_file_info(&self, path: &Path) -> Result<FileInfo> {
        if !path.exists() {
            return Err(EtlError::not_found(format!("{} does not exist", path.display())));
        }
        if let Some(metadata) = load_json::<FileMetadata>(&metadata_path(path))? {
            return Ok(FileInfo::Metadata(metadata));
        }
        Ok(FileInfo::Basic {
            file_path: path.display().to_string(),
            file_size: std::fs::metadata(path)?.len(),
            exists: true,
        })
    }
}

impl Loader for FileLoader {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn load(&mut self, batch: &RecordBatch, destination: Option<&str>) -> Result<()> {
        tracing::info!(records = batch.row_count(), "Starting file loading");
        let file_name = destination.map_or_else(|| self.default_file_name(), str::to_string);
        let path = self.config.output_dir.join(file_name);

        let result = self
            .encode(batch)
            .and_then(|bytes| atomic_write(&path, &bytes));

        self.stats = FileLoadStats {
            records_loaded: if result.is_ok() { batch.row_count() } else { 0 },
            file_path: Some(path.display().to_string()),
            file_format: self.config.file_format.clone(),
            columns: batch.columns.clone(),
            loading_successful: result.is_ok(),
            error: result.as_ref().err().map(ToString::to_string),
        };
        if let Err(e) = &result {
            tracing::error!(path = %path.display(), error = %e, "File loading failed");
            return result;
        }

        if self.config.save_metadata {
            match self.save_metadata(batch, &path) {
                Ok(sidecar) => tracing::info!(path = %sidecar.display(), "Metadata saved"),
                Err(e) => tracing::warn!(error = %e, "Failed to save metadata"),
            }
        }
        tracing::info!(
            records = batch.row_count(),
            path = %path.display(),
            "File loading completed"
        );
        Ok(())
    }

    fn validate(&self, batch: &RecordBatch) -> bool {
        let limit = (self.config.file_format == "excel").then_some(EXCEL_CELL_LIMIT);
        validate_for_load(Self::NAME, batch, limit)
    }

    fn stats(&self) -> Value {
        serde_json::to_value(&self.stats).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::io::Read;
    use tempfile::TempDir;

    fn batch() -> RecordBatch {
        RecordBatch::new(
            vec!["odor_n".into(), "class".into()],
            vec![vec![json!(true), json!("e")], vec![json!(false), json!("p")]],
        )
        .unwrap()
    }

    #[test]
    fn test_csv_with_metadata() {
        let dir = TempDir::new().unwrap();
        let mut loader = FileLoader::new(FileLoaderConfig::new("csv", dir.path()));
        loader.load(&batch(), None).unwrap();

        let path = dir.path().join("loaded_data.csv");
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "odor_n,class\nTrue,e\nFalse,p\n"
        );
        let info = loader.get_file_info(&path).unwrap();
        let FileInfo::Metadata(meta) = info else {
            panic!("expected sidecar metadata");
        };
        assert_eq!(meta.records_count, 2);
        assert_eq!(meta.dtypes["class"], "object");
        assert_eq!(meta.sha256, hash_file(&path).unwrap());
        assert!(dir.path().join("loaded_data.csv.meta.json").exists());
        assert!(!dir.path().join("loaded_data.json").exists());
    }

    #[test]
    fn test_json_records_and_sidecar_name() {
        let dir = TempDir::new().unwrap();
        let mut loader = FileLoader::new(FileLoaderConfig::new("json", dir.path()));
        loader.load(&batch(), Some("mushrooms.json")).unwrap();

        let text = std::fs::read_to_string(dir.path().join("mushrooms.json")).unwrap();
        let raw: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(raw, json!([{"odor_n": true, "class": "e"}, {"odor_n": false, "class": "p"}]));
        assert!(dir.path().join("mushrooms.json.meta.json").exists());
    }

    #[test]
    fn test_gzip_csv() {
        let dir = TempDir::new().unwrap();
        let mut config = FileLoaderConfig::new("csv", dir.path());
        config.compression = Compression::Gzip;
        config.save_metadata = false;
        let mut loader = FileLoader::new(config);
        loader.load(&batch(), None).unwrap();

        let file = std::fs::File::open(dir.path().join("loaded_data.csv.gz")).unwrap();
        let mut text = String::new();
        GzDecoder::new(file).read_to_string(&mut text).unwrap();
        assert!(text.starts_with("odor_n,class\n"));
    }

    #[test]
    fn test_index_and_headerless() {
        let dir = TempDir::new().unwrap();
        let mut config = FileLoaderConfig::new("csv", dir.path());
        config.index = true;
        config.header = false;
        let mut loader = FileLoader::new(config);
        loader.load(&batch(), Some("out.csv")).unwrap();
        assert_eq!(
            std::fs::read_to_string(dir.path().join("out.csv")).unwrap(),
            "0,True,e\n1,False,p\n"
        );
    }

    #[test]
    fn test_parquet_unsupported() {
        let dir = TempDir::new().unwrap();
        let mut loader = FileLoader::new(FileLoaderConfig::new("parquet", dir.path()));
        let err = loader.load(&batch(), None).unwrap_err();
        assert!(matches!(err, EtlError::UnsupportedFormat(_)));
        assert_eq!(loader.stats()["loading_successful"], json!(false));
    }

    #[test]
    fn test_unknown_format_written_as_csv() {
        let dir = TempDir::new().unwrap();
        let mut loader = FileLoader::new(FileLoaderConfig::new("tsv", dir.path()));
        loader.load(&batch(), None).unwrap();
        let text = std::fs::read_to_string(dir.path().join("loaded_data.tsv")).unwrap();
        assert!(text.starts_with("odor_n,class"));
    }

    #[test]
    fn test_compression_rejects_unknown() {
        let parsed: std::result::Result<Compression, _> = serde_json::from_value(json!("bz2"));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_file_info_without_sidecar() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.csv");
        std::fs::write(&path, "a\n1\n").unwrap();
        let loader = FileLoader::default();
        assert_eq!(
            loader.get_file_info(&path).unwrap(),
            FileInfo::Basic {
                file_path: path.display().to_string(),
                file_size: 4,
                exists: true,
            }
        );
        assert!(matches!(
            loader.get_file_info(&dir.path().join("missing.csv")),
            Err(EtlError::NotFound(_))
        ));
    }
}
