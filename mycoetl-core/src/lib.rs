//! # Mycoetl Core
//!
//! ETL library for the UCI mushroom dataset.
//! Provides extractors (UCI download, files, HTTP APIs), transformers
//! (cleaning, feature engineering), loaders (SQLite, flat files), the stage
//! orchestrators, and the top-level pipeline with its JSON run log.

pub mod config;
pub mod error;
pub mod extract;
pub mod load;
pub mod logging;
pub mod orchestration;
pub mod persistence;
pub mod table;
pub mod transform;

// Re-export commonly used types at the crate root.
pub use config::{LogFormat, LoggingConfig, Settings, load_settings};
pub use error::{EtlError, Result};
pub use extract::{
    ApiExtractor, ExtractionOrchestrator, Extractor, FileExtractor, UciMushroomExtractor,
};
pub use load::{DatabaseLoader, FileLoader, Loader, LoadingPipeline};
pub use orchestration::{EtlPipeline, PipelineHealth, PipelineStats, PipelineStatus, Stage};
pub use table::{ColumnType, RecordBatch};
pub use transform::{DataCleaner, FeatureEngineer, TransformationPipeline, Transformer};
