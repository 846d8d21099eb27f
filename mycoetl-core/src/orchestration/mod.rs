//! Top-level ETL run: extraction, transformation and loading in sequence,
//! with a JSON run log.

pub mod pipeline;
pub mod types;

pub use pipeline::{EtlPipeline, load_latest_pipeline_logs};
pub use types::{
    OverallHealth, PipelineHealth, PipelineStats, PipelineStatus, Stage, StageReport, TOTAL_STAGES,
};
