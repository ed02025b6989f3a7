use serde::{Deserialize, Serialize};

use crate::{Job, JobStatus, StageStatus};

/// Per-stage detail attached to an event when a stage transition fired it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDetail {
    pub stage_id: String,
    pub stage_status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_used: Option<String>,
}

/// Payload published on the `job_updates` channel after every job or
/// stage mutation the runner performs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: String,
    pub status: JobStatus,
    pub current_stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub cost_estimate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_detail: Option<StageDetail>,
}

impl JobEvent {
    /// Snapshot the publishable fields of a job.
    #[must_use]
    pub fn from_job(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            status: job.status,
            current_stage: job.current_stage.clone(),
            error: job.error.clone(),
            cost_estimate: job.cost_estimate,
            stage_detail: None,
        }
    }

    /// Attach stage detail to the event.
    #[must_use]
    pub fn with_stage_detail(mut self, detail: StageDetail) -> Self {
        self.stage_detail = Some(detail);
        self
    }
}
