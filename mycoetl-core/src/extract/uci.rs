//! UCI mushroom dataset extractor.

use super::{ExtractionMetadata, Extractor, check_missing_ratio, save_extraction_metadata};
use crate::config::Settings;
use crate::error::{EtlError, Result};
use crate::persistence::atomic_write;
use crate::table::csv_codec::{CsvReadOptions, CsvWriteOptions, read_csv, write_csv};
use crate::table::{ColumnType, RecordBatch};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// Column names of the headerless `agaricus-lepiota.data` file, in file order.
pub const MUSHROOM_COLUMNS: [&str; 23] = [
    "class",
    "cap-shape",
    "cap-surface",
    "cap-color",
    "bruises",
    "odor",
    "gill-attachment",
    "gill-spacing",
    "gill-size",
    "gill-color",
    "stalk-shape",
    "stalk-root",
    "stalk-surface-above-ring",
    "stalk-surface-below-ring",
    "stalk-color-above-ring",
    "stalk-color-below-ring",
    "veil-type",
    "veil-color",
    "ring-number",
    "ring-type",
    "spore-print-color",
    "habitat",
    "season",
];

const REQUIRED_COLUMNS: [&str; 4] = ["class", "cap-shape", "cap-surface", "cap-color"];
const OUTPUT_FILE: &str = "mushrooms.csv";

/// Downloads the UCI mushroom dataset.
pub struct UciMushroomExtractor {
    url: String,
    timeout: Duration,
    raw_dir: Option<PathBuf>,
}

impl UciMushroomExtractor {
    pub const NAME: &'static str = "uci_mushroom";

    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: Duration::from_secs(30),
            raw_dir: None,
        }
    }

    /// URL, timeout and raw data directory taken from settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.data_source.uci_mushroom_url.clone())
            .with_timeout(Duration::from_secs(settings.data_source.timeout_secs))
            .with_raw_dir(settings.raw_data_dir.clone())
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Save `mushrooms.csv` and the metadata sidecar under `dir`.
    pub fn with_raw_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.raw_dir = Some(dir.into());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn download(&self) -> Result<String> {
        let client = reqwest::Client::builder().timeout(self.timeout).build()?;
        let response = client.get(&self.url).send().await?;
        if !response.status().is_success() {
            return Err(EtlError::source(format!(
                "download of {} failed with status {}",
                self.url,
                response.status()
            )));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl Extractor for UciMushroomExtractor {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn extract(&self) -> Result<RecordBatch> {
        tracing::info!(url = %self.url, "Extracting UCI mushroom dataset");
        let body = self.download().await.inspect_err(|e| {
            tracing::error!(url = %self.url, error = %e, "Failed to download data");
        })?;

        let options = CsvReadOptions {
            has_header: false,
            column_names: Some(MUSHROOM_COLUMNS.iter().map(|c| c.to_string()).collect()),
            ..Default::default()
        };
        let batch = read_csv(body.as_bytes(), &options)?;

        if let Some(dir) = &self.raw_dir {
            let output = dir.join(OUTPUT_FILE);
            let mut buf = Vec::new();
            write_csv(&batch, &mut buf, &CsvWriteOptions::default())?;
            atomic_write(&output, &buf)?;

            let mut metadata = ExtractionMetadata::new("UCI ML Repository", &batch);
            metadata.url = Some(self.url.clone());
            metadata.output_file = Some(output.display().to_string());
            save_extraction_metadata(dir, Self::NAME, &metadata)?;
            tracing::info!(
                records = batch.row_count(),
                path = %output.display(),
                "Raw dataset saved"
            );
        }

        tracing::info!(records = batch.row_count(), "Extraction successful");
        Ok(batch)
    }

    fn validate(&self, batch: &RecordBatch) -> bool {
        if batch.is_empty() {
            tracing::error!(extractor = Self::NAME, "Extracted table is empty");
            return false;
        }

        let missing: Vec<&str> = REQUIRED_COLUMNS
            .iter()
            .copied()
            .filter(|c| !batch.has_column(c))
            .collect();
        if !missing.is_empty() {
            tracing::error!(extractor = Self::NAME, ?missing, "Missing required columns");
            return false;
        }

        let nulls = batch.null_count();
        if nulls > 0 {
            tracing::warn!(extractor = Self::NAME, missing_values = nulls, "Found missing values");
        }
        check_missing_ratio(Self::NAME, batch);

        let class_type = batch
            .column_index("class")
            .map(|idx| batch.column_type(idx));
        if class_type != Some(ColumnType::String) {
            tracing::error!(extractor = Self::NAME, "Class column should be categorical");
            return false;
        }

        tracing::info!(extractor = Self::NAME, "Data validation passed");
        true
    }
}
