use thiserror::Error;
use voxflow_types::JobStatus;

/// Errors surfaced by the job store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Insert collided with an existing job id.
    #[error("job id already exists: {id}")]
    Conflict { id: String },

    #[error("job not found: {id}")]
    NotFound { id: String },

    /// Terminal statuses are never overwritten.
    #[error("job {id} is already terminal ({status})")]
    AlreadyTerminal { id: String, status: JobStatus },

    /// A persisted value did not parse back into its domain type.
    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}
