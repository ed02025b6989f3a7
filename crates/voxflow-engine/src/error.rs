use std::path::PathBuf;

use thiserror::Error;

/// Errors that terminate a job run.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The job was cancelled; the runner halts without overwriting the
    /// terminal status.
    #[error("job was cancelled")]
    Cancelled,

    /// The source file is in neither quarantine nor its original location.
    #[error("source file missing: {}", path.display())]
    FileMissing { path: PathBuf },

    /// A pipeline stage failed; the stage row carries the same message.
    #[error("stage '{stage}' failed: {message}")]
    StageFailed { stage: String, message: String },

    #[error(transparent)]
    Store(#[from] voxflow_store::StoreError),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl EngineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        EngineError::Io {
            path: path.into(),
            source,
        }
    }
}
