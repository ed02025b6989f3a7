//! Upload-size transcoding
//!
//! The whisper endpoint rejects uploads over 25 MB. Oversized files are
//! transcoded to mono OGG at a bitrate computed from the probed duration,
//! targeting ~20 MB; if the first pass is still over the limit a second
//! pass runs at 24 kbps before giving up.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, info};

use crate::error::AsrError;
use crate::transcriber::MAX_UPLOAD_BYTES;

/// Target size after transcoding, kept under the limit with headroom.
const TARGET_BYTES: u64 = 20 * 1024 * 1024;
const MIN_BITRATE_KBPS: u64 = 32;
const MAX_BITRATE_KBPS: u64 = 128;
const RETRY_BITRATE_KBPS: u64 = 24;

/// Whether a file of `size_bytes` must be transcoded before upload.
///
/// Exactly at the limit uploads as-is; one byte over triggers transcoding.
#[must_use]
pub fn needs_compression(size_bytes: u64) -> bool {
    size_bytes > MAX_UPLOAD_BYTES
}

/// Bitrate in kbps that lands a file of `duration_secs` near the target
/// size, clamped to a speech-sane range.
fn target_bitrate_kbps(duration_secs: f64) -> u64 {
    if duration_secs <= 0.0 {
        return MAX_BITRATE_KBPS;
    }
    let kbps = (TARGET_BYTES as f64 * 8.0 / duration_secs / 1000.0) as u64;
    kbps.clamp(MIN_BITRATE_KBPS, MAX_BITRATE_KBPS)
}

/// Transcode `input` to a temporary mono OGG under the upload limit.
///
/// Returns the temp file handle; dropping it removes the file.
///
/// # Errors
///
/// `AsrError::Compression` when ffmpeg/ffprobe fail, `AsrError::TooLarge`
/// when even the low-bitrate pass cannot get under the limit.
pub(crate) async fn compress_for_upload(input: &Path) -> Result<tempfile::NamedTempFile, AsrError> {
    let duration = probe_duration(input).await?;
    let bitrate = target_bitrate_kbps(duration);
    info!(
        input = %input.display(),
        duration_secs = duration,
        bitrate_kbps = bitrate,
        "transcoding oversized audio for upload"
    );

    let output = transcode(input, bitrate).await?;
    let size = file_size(output.path())?;
    if size <= MAX_UPLOAD_BYTES {
        debug!(size_bytes = size, "transcode pass 1 fits");
        return Ok(output);
    }

    info!(size_bytes = size, retry_bitrate_kbps = RETRY_BITRATE_KBPS, "retrying at lower bitrate");
    let output = transcode(input, RETRY_BITRATE_KBPS).await?;
    let size = file_size(output.path())?;
    if size <= MAX_UPLOAD_BYTES {
        return Ok(output);
    }

    Err(AsrError::TooLarge {
        size_bytes: size,
        limit_bytes: MAX_UPLOAD_BYTES,
    })
}

async fn transcode(input: &Path, bitrate_kbps: u64) -> Result<tempfile::NamedTempFile, AsrError> {
    let output = tempfile::Builder::new()
        .prefix("voxflow-asr-")
        .suffix(".ogg")
        .tempfile()
        .map_err(|e| AsrError::Compression(format!("temp file: {e}")))?;

    let status = Command::new("ffmpeg")
        .arg("-y")
        .arg("-i")
        .arg(input)
        .args(["-ac", "1", "-c:a", "libvorbis"])
        .args(["-b:a", &format!("{bitrate_kbps}k")])
        .args(["-f", "ogg"])
        .arg(output.path())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| AsrError::Compression(format!("failed to spawn ffmpeg: {e}")))?;

    if !status.success() {
        return Err(AsrError::Compression(format!(
            "ffmpeg exited with {status}"
        )));
    }
    Ok(output)
}

async fn probe_duration(input: &Path) -> Result<f64, AsrError> {
    let output = Command::new("ffprobe")
        .args(["-v", "error", "-show_entries", "format=duration"])
        .args(["-of", "default=noprint_wrappers=1:nokey=1"])
        .arg(input)
        .stderr(Stdio::null())
        .output()
        .await
        .map_err(|e| AsrError::Compression(format!("failed to spawn ffprobe: {e}")))?;

    if !output.status.success() {
        return Err(AsrError::Compression(format!(
            "ffprobe exited with {}",
            output.status
        )));
    }
    let text = String::from_utf8_lossy(&output.stdout);
    text.trim()
        .parse::<f64>()
        .map_err(|e| AsrError::Compression(format!("ffprobe duration '{}': {e}", text.trim())))
}

fn file_size(path: &Path) -> Result<u64, AsrError> {
    std::fs::metadata(path)
        .map(|m| m.len())
        .map_err(|e| AsrError::Unreadable {
            path: PathBuf::from(path),
            source: e,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boundary_is_exclusive_at_the_limit() {
        assert!(!needs_compression(MAX_UPLOAD_BYTES));
        assert!(needs_compression(MAX_UPLOAD_BYTES + 1));
        assert!(!needs_compression(0));
    }

    #[test]
    fn bitrate_scales_with_duration_within_clamps() {
        // A one-hour recording: 20MB * 8 / 3600s / 1000 ≈ 46 kbps.
        let kbps = target_bitrate_kbps(3600.0);
        assert!((40..=52).contains(&kbps), "got {kbps}");

        // Short clips clamp high, marathon recordings clamp low.
        assert_eq!(target_bitrate_kbps(60.0), MAX_BITRATE_KBPS);
        assert_eq!(target_bitrate_kbps(100_000.0), MIN_BITRATE_KBPS);
        assert_eq!(target_bitrate_kbps(0.0), MAX_BITRATE_KBPS);
    }
}
