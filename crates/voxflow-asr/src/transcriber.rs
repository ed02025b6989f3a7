use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use voxflow_types::{TranscriptSegment, Transcription};

use crate::compress::{compress_for_upload, needs_compression};
use crate::error::AsrError;

/// Hard upload limit of the whisper endpoint.
pub const MAX_UPLOAD_BYTES: u64 = 25 * 1024 * 1024;

/// Extensions the endpoint accepts directly.
const SUPPORTED_FORMATS: &[&str] = &[
    "mp3", "mp4", "mpeg", "mpga", "m4a", "wav", "webm", "ogg", "flac",
];

const DEFAULT_API_URL: &str = "https://api.groq.com/openai/v1/audio/transcriptions";
const DEFAULT_MODEL: &str = "whisper-large-v3-turbo";

/// End-to-end timeout around the upload call only; validation and
/// transcoding are not subject to it.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

const MAX_ATTEMPTS_5XX: u32 = 3;
const QUOTA_BACKOFF_SECS: [u64; 3] = [1, 2, 4];

/// ASR seam; the engine holds a trait object so tests can run the pipeline
/// without a network.
#[async_trait]
pub trait Transcribe: Send + Sync {
    /// Transcribe one local media file.
    ///
    /// # Errors
    ///
    /// Returns `AsrError` for validation, transport, and contract failures.
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcription, AsrError>;
}

/// HTTP client for a whisper-family transcription endpoint.
pub struct WhisperTranscriber {
    api_key: String,
    model: String,
    api_url: String,
    client: reqwest::Client,
}

impl WhisperTranscriber {
    /// Build a transcriber for the default endpoint and model.
    ///
    /// # Errors
    ///
    /// Returns `AsrError::Transport` if the TLS client cannot be built.
    pub fn new(api_key: impl Into<String>) -> Result<Self, AsrError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| AsrError::Transport(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            client,
        })
    }

    /// Override the endpoint URL (tests, self-hosted gateways).
    #[must_use]
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    /// Override the whisper model.
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    fn validate(path: &Path, size: u64) -> Result<(), AsrError> {
        if size > MAX_UPLOAD_BYTES {
            return Err(AsrError::TooLarge {
                size_bytes: size,
                limit_bytes: MAX_UPLOAD_BYTES,
            });
        }
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();
        if !SUPPORTED_FORMATS.contains(&extension.as_str()) {
            return Err(AsrError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension,
            });
        }
        Ok(())
    }

    async fn upload(&self, path: &Path, bytes: Vec<u8>) -> Result<RawResponse, AsrError> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("audio")
            .to_string();
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("bin")
            .to_string();

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            let part = reqwest::multipart::Part::bytes(bytes.clone())
                .file_name(file_name.clone())
                .mime_str(&format!("audio/{extension}"))
                .map_err(|e| AsrError::Transport(format!("invalid mime type: {e}")))?;
            let form = reqwest::multipart::Form::new()
                .text("model", self.model.clone())
                .text("response_format", "json")
                .part("file", part);

            debug!(attempt, file = %file_name, "uploading audio for transcription");
            let result = self
                .client
                .post(&self.api_url)
                .bearer_auth(&self.api_key)
                .multipart(form)
                .timeout(REQUEST_TIMEOUT)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    if status.as_u16() == 429 {
                        if let Some(delay) = QUOTA_BACKOFF_SECS.get(attempt as usize - 1) {
                            warn!(attempt, delay, "ASR rate limited, backing off");
                            tokio::time::sleep(Duration::from_secs(*delay)).await;
                            continue;
                        }
                        return Err(AsrError::RateLimited { attempts: attempt });
                    }
                    if status.is_server_error() {
                        if attempt < MAX_ATTEMPTS_5XX {
                            let delay = 1u64 << attempt;
                            warn!(attempt, status = status.as_u16(), delay, "ASR server error, retrying");
                            tokio::time::sleep(Duration::from_secs(delay)).await;
                            continue;
                        }
                        return Err(AsrError::ServerError {
                            status: status.as_u16(),
                            attempts: attempt,
                        });
                    }
                    if !status.is_success() {
                        let message = response.text().await.unwrap_or_default();
                        return Err(AsrError::Rejected {
                            status: status.as_u16(),
                            message,
                        });
                    }
                    return response
                        .json::<RawResponse>()
                        .await
                        .map_err(|e| AsrError::InvalidResponse(e.to_string()));
                }
                Err(e) if e.is_timeout() => {
                    if attempt < MAX_ATTEMPTS_5XX {
                        let delay = 1u64 << attempt;
                        warn!(attempt, delay, "ASR request timed out, retrying");
                        tokio::time::sleep(Duration::from_secs(delay)).await;
                        continue;
                    }
                    return Err(AsrError::Timeout {
                        duration: REQUEST_TIMEOUT,
                    });
                }
                Err(e) => {
                    if attempt < MAX_ATTEMPTS_5XX {
                        let delay = 1u64 << attempt;
                        warn!(attempt, delay, error = %e, "ASR connection error, retrying");
                        tokio::time::sleep(Duration::from_secs(delay)).await;
                        continue;
                    }
                    return Err(AsrError::Transport(format!(
                        "connection error persisted after {attempt} attempts: {e}"
                    )));
                }
            }
        }
    }
}

#[async_trait]
impl Transcribe for WhisperTranscriber {
    async fn transcribe(&self, audio_path: &Path) -> Result<Transcription, AsrError> {
        let metadata = tokio::fs::metadata(audio_path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                AsrError::FileMissing {
                    path: audio_path.to_path_buf(),
                }
            } else {
                AsrError::Unreadable {
                    path: audio_path.to_path_buf(),
                    source: e,
                }
            }
        })?;

        // Files over the limit are transcoded into a temp file; the handle
        // keeps the file alive until the upload finishes.
        let compressed = if needs_compression(metadata.len()) {
            info!(
                size_bytes = metadata.len(),
                limit_bytes = MAX_UPLOAD_BYTES,
                "audio exceeds upload limit, transcoding"
            );
            Some(compress_for_upload(audio_path).await?)
        } else {
            None
        };
        let upload_path: PathBuf = compressed
            .as_ref()
            .map_or_else(|| audio_path.to_path_buf(), |f| f.path().to_path_buf());

        let bytes = tokio::fs::read(&upload_path)
            .await
            .map_err(|e| AsrError::Unreadable {
                path: upload_path.clone(),
                source: e,
            })?;
        Self::validate(&upload_path, bytes.len() as u64)?;

        let raw = self.upload(&upload_path, bytes).await?;
        let transcription = parse_response(raw);
        info!(
            segments = transcription.segments.len(),
            duration_secs = transcription.duration,
            language = %transcription.language,
            "transcription complete"
        );
        Ok(transcription)
    }
}

/// Raw wire shape of the transcription response.
#[derive(Debug, Default, Deserialize)]
pub struct RawResponse {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<RawSegment>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawSegment {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    start: f64,
    #[serde(default)]
    end: f64,
    #[serde(default)]
    text: String,
}

/// Normalize the wire response into the durable artifact shape.
///
/// Segment ids default to their index; a response with text but no segments
/// becomes one whole-duration segment; the duration falls back to the
/// maximum segment end; the language falls back to "unknown".
#[must_use]
pub fn parse_response(raw: RawResponse) -> Transcription {
    let text = raw.text.trim().to_string();

    let mut segments: Vec<TranscriptSegment> = raw
        .segments
        .into_iter()
        .enumerate()
        .map(|(idx, seg)| TranscriptSegment {
            id: seg.id.unwrap_or(idx as i64),
            start: seg.start,
            end: seg.end,
            text: seg.text.trim().to_string(),
        })
        .collect();

    if segments.is_empty() && !text.is_empty() {
        let end = raw.duration.unwrap_or(0.0);
        segments.push(TranscriptSegment {
            id: 0,
            start: 0.0,
            end,
            text: text.clone(),
        });
    }

    let duration = segments
        .iter()
        .map(|s| s.end)
        .fold(0.0_f64, f64::max);

    Transcription {
        text,
        segments,
        language: raw.language.unwrap_or_else(|| "unknown".to_string()),
        duration,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(json: &str) -> RawResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn parse_normalizes_segments_and_duration() {
        let t = parse_response(raw(
            r#"{"text":" hello world ",
                "segments":[
                    {"id":0,"start":0.0,"end":2.0,"text":" hello "},
                    {"start":2.0,"end":5.5,"text":" world "}
                ],
                "language":"en"}"#,
        ));
        assert_eq!(t.text, "hello world");
        assert_eq!(t.segments.len(), 2);
        // Missing id defaults to the index.
        assert_eq!(t.segments[1].id, 1);
        assert_eq!(t.segments[1].text, "world");
        // Duration derives from the max segment end.
        assert!((t.duration - 5.5).abs() < 1e-9);
        assert_eq!(t.language, "en");
    }

    #[test]
    fn parse_fabricates_single_segment_when_only_text() {
        let t = parse_response(raw(r#"{"text":"just text","duration":12.0}"#));
        assert_eq!(t.segments.len(), 1);
        assert_eq!(t.segments[0].text, "just text");
        assert!((t.segments[0].end - 12.0).abs() < 1e-9);
        assert!((t.duration - 12.0).abs() < 1e-9);
        assert_eq!(t.language, "unknown");
    }

    #[test]
    fn parse_empty_response_is_empty_transcription() {
        let t = parse_response(raw(r"{}"));
        assert!(t.text.is_empty());
        assert!(t.segments.is_empty());
        assert_eq!(t.duration, 0.0);
    }

    #[test]
    fn validate_rejects_unsupported_extension_and_oversize() {
        let err = WhisperTranscriber::validate(Path::new("/tmp/a.mkv"), 1024).unwrap_err();
        assert!(matches!(err, AsrError::UnsupportedFormat { .. }));

        let err =
            WhisperTranscriber::validate(Path::new("/tmp/a.mp3"), MAX_UPLOAD_BYTES + 1).unwrap_err();
        assert!(matches!(err, AsrError::TooLarge { .. }));

        // Exactly at the limit is fine.
        WhisperTranscriber::validate(Path::new("/tmp/a.mp3"), MAX_UPLOAD_BYTES).unwrap();
    }
}
