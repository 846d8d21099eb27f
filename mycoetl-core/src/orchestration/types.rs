//! Run-state types for the ETL pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Number of stages in a complete run.
pub const TOTAL_STAGES: usize = 3;

/// One of the three pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    Transformation,
    Loading,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Extraction => write!(f, "extraction"),
            Stage::Transformation => write!(f, "transformation"),
            Stage::Loading => write!(f, "loading"),
        }
    }
}

/// Lifecycle of a pipeline run: `initialized -> running -> completed | failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    #[default]
    Initialized,
    Running,
    Completed,
    Failed,
}

impl PipelineStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStatus::Initialized => write!(f, "initialized"),
            PipelineStatus::Running => write!(f, "running"),
            PipelineStatus::Completed => write!(f, "completed"),
            PipelineStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StageReport {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub components_total: usize,
    pub components_succeeded: usize,
    pub input_records: usize,
    pub output_records: usize,
    /// The stage orchestrator's own summary.
    #[serde(default)]
    pub summary: serde_json::Value,
}

impl StageReport {
    pub fn failed(error: impl Into<String>, components_total: usize) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            components_total,
            ..Self::default()
        }
    }
}

/// Everything recorded about a run; serialized as the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub pipeline_id: String,
    pub status: PipelineStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub duration_secs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub stages: BTreeMap<Stage, StageReport>,
}

impl PipelineStats {
    pub fn new(pipeline_id: impl Into<String>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            status: PipelineStatus::Initialized,
            start_time: None,
            end_time: None,
            duration_secs: None,
            error: None,
            stages: BTreeMap::new(),
        }
    }

    pub fn stages_completed(&self) -> usize {
        self.stages.values().filter(|s| s.success).count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    Healthy,
    Unhealthy,
}

impl fmt::Display for OverallHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverallHealth::Healthy => write!(f, "healthy"),
            OverallHealth::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineHealth {
    pub pipeline_id: String,
    pub status: PipelineStatus,
    pub stages_completed: usize,
    pub total_stages: usize,
    pub overall_health: OverallHealth,
}

impl From<&PipelineStats> for PipelineHealth {
    fn from(stats: &PipelineStats) -> Self {
        let overall_health = if stats.status == PipelineStatus::Completed {
            OverallHealth::Healthy
        } else {
            OverallHealth::Unhealthy
        };
        Self {
            pipeline_id: stats.pipeline_id.clone(),
            status: stats.status,
            stages_completed: stats.stages_completed(),
            total_stages: TOTAL_STAGES,
            overall_health,
        }
    }
}
