//! Error types for the mycoetl core library.
//!
//! Uses `thiserror` with one variant family per failure class: source errors
//! (network, missing file, unsupported format), validation errors, and
//! persistence errors raised while loading.

use thiserror::Error;

/// Top-level error type for ETL operations.
#[derive(Debug, Error)]
pub enum EtlError {
    #[error("Source error: {0}")]
    Source(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl EtlError {
    pub fn source(msg: impl Into<String>) -> Self {
        Self::Source(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transform(msg: impl Into<String>) -> Self {
        Self::Transform(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        Self::Persistence(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this error came from the data source rather than from
    /// validation or persistence.
    pub fn is_source_error(&self) -> bool {
        matches!(
            self,
            Self::Source(_)
                | Self::NotFound(_)
                | Self::UnsupportedFormat(_)
                | Self::Http(_)
                | Self::Csv(_)
        )
    }
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_family() {
        let err = EtlError::validation("missing required columns: class");
        assert_eq!(
            err.to_string(),
            "Validation error: missing required columns: class"
        );
    }

    #[test]
    fn test_source_classification() {
        assert!(EtlError::not_found("data.csv").is_source_error());
        assert!(EtlError::unsupported("parquet").is_source_error());
        assert!(!EtlError::persistence("table exists").is_source_error());
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: EtlError = io.into();
        assert!(matches!(err, EtlError::Io(_)));
    }
}
