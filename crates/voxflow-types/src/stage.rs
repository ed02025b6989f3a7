use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Execution state of one `(job, stage)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StageStatus {
    #[serde(rename = "PENDING")]
    Pending,
    #[serde(rename = "RUNNING")]
    Running,
    #[serde(rename = "COMPLETE")]
    Complete,
    #[serde(rename = "FAILED")]
    Failed,
}

impl StageStatus {
    /// Wire/database representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            StageStatus::Pending => "PENDING",
            StageStatus::Running => "RUNNING",
            StageStatus::Complete => "COMPLETE",
            StageStatus::Failed => "FAILED",
        }
    }

    /// Parse the wire/database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(StageStatus::Pending),
            "RUNNING" => Some(StageStatus::Running),
            "COMPLETE" => Some(StageStatus::Complete),
            "FAILED" => Some(StageStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for StageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one stage the runner has touched.
///
/// Unique on `(job_id, stage_id)`. A `Complete` row whose `output_path`
/// no longer exists on disk is treated as incomplete and re-executed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub job_id: String,
    pub stage_id: String,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub model_used: Option<String>,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_estimate: f64,
    /// Path to this stage's durable artifact, set on completion of
    /// resumable stages.
    pub output_path: Option<String>,
    pub error: Option<String>,
}

impl StageResult {
    /// A fresh PENDING row for the given pair.
    #[must_use]
    pub fn pending(job_id: impl Into<String>, stage_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            stage_id: stage_id.into(),
            status: StageStatus::Pending,
            started_at: None,
            completed_at: None,
            model_used: None,
            input_tokens: 0,
            output_tokens: 0,
            cost_estimate: 0.0,
            output_path: None,
            error: None,
        }
    }
}
