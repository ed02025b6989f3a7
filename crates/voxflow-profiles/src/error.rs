use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the profile registry.
#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile not found: {id}")]
    NotFound { id: String },

    #[error("profile already exists: {id}")]
    Conflict { id: String },

    #[error("invalid profile id '{id}': must match [a-z0-9][a-z0-9_-]{{0,63}}")]
    InvalidId { id: String },

    #[error("cannot delete built-in profile '{id}'")]
    BuiltIn { id: String },

    #[error("stage index {index} out of range for profile '{id}'")]
    StageOutOfRange { id: String, index: usize },

    /// Prompt paths must stay under the prompts root.
    #[error("invalid prompt file path: {path}")]
    UnsafePromptPath { path: String },

    #[error("failed to parse profile {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("failed to serialize profile: {0}")]
    Serialize(#[from] serde_yaml::Error),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl ProfileError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ProfileError::Io {
            path: path.into(),
            source,
        }
    }
}
