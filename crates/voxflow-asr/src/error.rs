use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the ASR executor.
#[derive(Debug, Error)]
pub enum AsrError {
    #[error("audio file not found: {}", path.display())]
    FileMissing { path: PathBuf },

    #[error("audio file is not readable: {}: {source}", path.display())]
    Unreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("unsupported audio format '{extension}' for {}", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    /// The file could not be brought under the upload limit.
    #[error("audio file too large after compression ({size_bytes} bytes, limit {limit_bytes})")]
    TooLarge { size_bytes: u64, limit_bytes: u64 },

    #[error("audio compression failed: {0}")]
    Compression(String),

    /// 4xx other than 429; never retried.
    #[error("ASR request rejected ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// 429 after the backoff ladder was exhausted.
    #[error("ASR rate limit exceeded after {attempts} attempts")]
    RateLimited { attempts: u32 },

    /// 5xx after retries were exhausted.
    #[error("ASR server error persisted after {attempts} attempts (last status {status})")]
    ServerError { status: u16, attempts: u32 },

    #[error("ASR request timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("ASR transport error: {0}")]
    Transport(String),

    #[error("ASR response did not parse: {0}")]
    InvalidResponse(String),
}
