//! HTTP API extractor.

use super::{Extractor, MISSING_WARN_RATIO};
use crate::error::{EtlError, Result};
use crate::table::RecordBatch;
use crate::table::csv_codec::{CsvReadOptions, read_csv};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;

/// Request options for [`ApiExtractor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiExtractorConfig {
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Columns the response must contain to pass validation.
    #[serde(default)]
    pub required_columns: Vec<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

impl ApiExtractorConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: BTreeMap::new(),
            params: BTreeMap::new(),
            timeout_secs: default_timeout_secs(),
            required_columns: Vec::new(),
        }
    }
}

/// Decoded response body before it is shaped into a table.
#[derive(Debug)]
enum Payload {
    Json(Value),
    Text(String),
}

/// Fetches a table from a REST endpoint.
pub struct ApiExtractor {
    config: ApiExtractorConfig,
}

impl ApiExtractor {
    pub const NAME: &'static str = "api_extractor";

    pub fn new(config: ApiExtractorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ApiExtractorConfig {
        &self.config
    }

    async fn send(&self) -> Result<reqwest::Response> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.config.timeout_secs))
            .build()?;
        let mut request = client.get(&self.config.url).query(&self.config.params);
        for (k, v) in &self.config.headers {
            request = request.header(k.as_str(), v.as_str());
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(EtlError::source(format!(
                "API request to {} failed with status {}",
                self.config.url,
                response.status()
            )));
        }
        Ok(response)
    }

    /// Issue the configured request once. Errors are logged, not returned.
    pub async fn test_connection(&self) -> bool {
        match self.send().await {
            Ok(_) => {
                tracing::info!(url = %self.config.url, "API connection test successful");
                true
            }
            Err(e) => {
                tracing::error!(url = %self.config.url, error = %e, "API connection test failed");
                false
            }
        }
    }
}

async fn decode(response: reqwest::Response) -> Result<Payload> {
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let body = response.text().await?;

    if content_type.contains("application/json") {
        Ok(Payload::Json(serde_json::from_str(&body)?))
    } else if content_type.contains("text/csv") || content_type.contains("text/plain") {
        Ok(Payload::Text(body))
    } else {
        Ok(match serde_json::from_str(&body) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Text(body),
        })
    }
}

fn payload_to_batch(payload: Payload) -> Result<RecordBatch> {
    match payload {
        Payload::Json(value) => shape_json(value),
        Payload::Text(text) => {
            let trimmed = text.trim();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                shape_json(serde_json::from_str(trimmed)?)
            } else {
                read_csv(text.as_bytes(), &CsvReadOptions::default())
            }
        }
    }
}

/// Normalize the common response shapes into a table.
fn shape_json(value: Value) -> Result<RecordBatch> {
    match value {
        Value::Array(items) => {
            if items.first().is_some_and(Value::is_object) {
                RecordBatch::from_records(&items)
            } else {
                let rows = items.into_iter().map(|v| vec![v]).collect();
                RecordBatch::new(vec!["value".to_string()], rows)
            }
        }
        Value::Object(mut map) => {
            for key in ["data", "results"] {
                if map.get(key).is_some_and(Value::is_array) {
                    if let Some(inner) = map.remove(key) {
                        return shape_json(inner);
                    }
                }
            }
            RecordBatch::from_records(&[Value::Object(map)])
        }
        scalar => RecordBatch::from_records(&[json!({ "value": scalar })]),
    }
}

#[async_trait]
impl Extractor for ApiExtractor {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn extract(&self) -> Result<RecordBatch> {
        tracing::info!(url = %self.config.url, "Extracting data from API");
        let response = self.send().await.inspect_err(|e| {
            tracing::error!(url = %self.config.url, error = %e, "API request failed");
        })?;
        let batch = payload_to_batch(decode(response).await?)?;
        tracing::info!(records = batch.row_count(), "Extracted records from API");
        Ok(batch)
    }

    fn validate(&self, batch: &RecordBatch) -> bool {
        if batch.is_empty() {
            tracing::warn!(extractor = Self::NAME, "API returned empty data");
            return false;
        }

        let missing: Vec<&str> = self
            .config
            .required_columns
            .iter()
            .map(String::as_str)
            .filter(|c| !batch.has_column(c))
            .collect();
        if !missing.is_empty() {
            tracing::error!(extractor = Self::NAME, ?missing, "Missing required columns");
            return false;
        }

        let ratio = batch.missing_ratio();
        if ratio > MISSING_WARN_RATIO {
            tracing::warn!(
                extractor = Self::NAME,
                null_pct = %format!("{:.2}", ratio * 100.0),
                "High percentage of null values"
            );
        }

        tracing::info!(
            records = batch.row_count(),
            columns = batch.column_count(),
            "Data validation passed"
        );
        true
    }
}
