//! Uploaded-file handling
//!
//! Validates the extension against the media allow-list and streams the
//! body to disk under `<uploads>/<profile_id>/`, enforcing the size cap
//! during the write rather than after it.

use std::path::{Path, PathBuf};

use axum::extract::multipart::Field;
use axum::http::StatusCode;
use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tracing::warn;

use crate::error::ApiError;
use crate::MAX_UPLOAD_BYTES;

/// Accepted media extensions, audio then video.
pub const ALLOWED_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "m4a", "flac", "ogg", "aac", "wma", "mp4", "mov", "avi", "mkv", "webm", "flv",
];

/// Validate a client-supplied filename's extension.
///
/// # Errors
///
/// Returns 400 for unknown or missing extensions.
pub fn validate_extension(filename: &str) -> Result<String, ApiError> {
    let extension = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if !ALLOWED_EXTENSIONS.contains(&extension.as_str()) {
        return Err(ApiError::bad_request(format!(
            "Invalid file type '.{extension}'. Allowed: {}",
            ALLOWED_EXTENSIONS.join(", ")
        )));
    }
    Ok(extension)
}

/// Stream one multipart field to disk, enforcing the 500 MB cap while
/// writing. Returns the saved absolute path.
///
/// # Errors
///
/// 400 on a bad extension, 413 when the cap is hit (the partial file is
/// removed), 500 on I/O failure.
pub async fn save_upload(
    mut field: Field<'_>,
    uploads_dir: &Path,
    profile_id: &str,
) -> Result<PathBuf, ApiError> {
    let filename = field
        .file_name()
        .map(ToString::to_string)
        .ok_or_else(|| ApiError::bad_request("file field has no filename"))?;
    validate_extension(&filename)?;

    let dir = uploads_dir.join(profile_id);
    tokio::fs::create_dir_all(&dir)
        .await
        .map_err(|e| ApiError::internal(format!("failed to create upload directory: {e}")))?;

    let stem = Path::new(&filename)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    let extension = Path::new(&filename)
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();
    let timestamp = Utc::now().format("%Y-%m-%d-%H-%M-%S");
    let path = dir.join(format!("{timestamp}_{stem}.{extension}"));

    let mut file = tokio::fs::File::create(&path)
        .await
        .map_err(|e| ApiError::internal(format!("failed to create file: {e}")))?;

    let mut written: u64 = 0;
    loop {
        let chunk = match field.chunk().await {
            Ok(Some(chunk)) => chunk,
            Ok(None) => break,
            Err(e) => {
                remove_partial(&path).await;
                return Err(ApiError::bad_request(format!("upload aborted: {e}")));
            }
        };
        written += chunk.len() as u64;
        if written > MAX_UPLOAD_BYTES {
            remove_partial(&path).await;
            return Err(ApiError::new(
                StatusCode::PAYLOAD_TOO_LARGE,
                format!("file exceeds the {} MB limit", MAX_UPLOAD_BYTES / (1024 * 1024)),
            ));
        }
        if let Err(e) = file.write_all(&chunk).await {
            remove_partial(&path).await;
            return Err(ApiError::internal(format!("failed to write upload: {e}")));
        }
    }
    if let Err(e) = file.flush().await {
        remove_partial(&path).await;
        return Err(ApiError::internal(format!("failed to flush upload: {e}")));
    }

    Ok(path)
}

async fn remove_partial(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!(path = %path.display(), error = %e, "failed to remove partial upload");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allow_list_covers_audio_and_video() {
        for name in ["a.mp3", "b.WAV", "c.m4a", "d.mkv", "e.webm"] {
            validate_extension(name).unwrap();
        }
    }

    #[test]
    fn unknown_extensions_are_rejected() {
        for name in ["notes.txt", "archive.zip", "noext", "script.sh"] {
            let err = validate_extension(name).unwrap_err();
            assert_eq!(err.status, StatusCode::BAD_REQUEST, "{name}");
        }
    }
}
