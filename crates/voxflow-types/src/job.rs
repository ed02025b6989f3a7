use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a submitted job.
///
/// The status is monotone: once a job reaches a terminal state
/// (`Complete`, `Failed`, `Cancelled`) it is never changed again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "QUEUED")]
    Queued,
    #[serde(rename = "PROCESSING")]
    Processing,
    #[serde(rename = "COMPLETE")]
    Complete,
    #[serde(rename = "FAILED")]
    Failed,
    #[serde(rename = "CANCELLED")]
    Cancelled,
}

impl JobStatus {
    /// Wire/database representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "QUEUED",
            JobStatus::Processing => "PROCESSING",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        }
    }

    /// Parse the wire/database representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "QUEUED" => Some(JobStatus::Queued),
            "PROCESSING" => Some(JobStatus::Processing),
            "COMPLETE" => Some(JobStatus::Complete),
            "FAILED" => Some(JobStatus::Failed),
            "CANCELLED" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal statuses are never overwritten.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Complete | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One submitted unit of work over a single media file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Opaque unique id assigned on create (UUID v4).
    pub id: String,
    /// Profile id, or a built-in note-type label for the default pipeline.
    pub profile_id: String,
    /// Absolute path to the input media on local storage.
    pub source_path: String,
    pub status: JobStatus,
    /// Stage name most recently entered; `None` until the first stage starts.
    pub current_stage: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Set when the job reaches a terminal state.
    pub completed_at: Option<DateTime<Utc>>,
    /// Queue priority, 1 = highest, 10 = lowest.
    pub priority: i64,
    /// Running sum of completed stage costs in USD.
    pub cost_estimate: f64,
    /// Populated when `status == Failed`.
    pub error: Option<String>,
}

impl Job {
    /// Build a fresh QUEUED job for the given source file.
    #[must_use]
    pub fn queued(
        id: impl Into<String>,
        profile_id: impl Into<String>,
        source_path: impl Into<String>,
        priority: i64,
    ) -> Self {
        Self {
            id: id.into(),
            profile_id: profile_id.into(),
            source_path: source_path.into(),
            status: JobStatus::Queued,
            current_stage: None,
            created_at: Utc::now(),
            completed_at: None,
            priority,
            cost_estimate: 0.0,
            error: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_wire_form() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Complete,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("queued"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Complete.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn queued_job_has_no_stage_or_cost() {
        let job = Job::queued("j-1", "meeting", "/data/a.mp3", 5);
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.current_stage.is_none());
        assert_eq!(job.cost_estimate, 0.0);
        assert!(job.completed_at.is_none());
    }
}
