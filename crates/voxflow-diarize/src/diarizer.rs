//! Local diarization executor
//!
//! The neural model runs out of process: a helper command receives the
//! audio path and prints `{speaker, start, end}` triples as JSON. Model
//! availability is verified once per process and cached; the model-hub
//! token must be present for the check to pass. Every failure here is
//! recoverable by the caller with a single-speaker substitute.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use voxflow_types::SpeakerSegment;

const DEFAULT_HELPER_BIN: &str = "voxflow-diarize-helper";
const DEFAULT_MODEL: &str = "speaker-diarization-3.1";

static LABEL_NUM_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").unwrap());

/// Errors from diarization; all are non-fatal at the job level.
#[derive(Debug, Error)]
pub enum DiarizeError {
    /// The model token is missing or the helper could not load the model.
    #[error("diarization model load failed: {0}")]
    ModelLoad(String),

    #[error("diarization inference failed: {0}")]
    Inference(String),

    #[error("diarization output did not parse: {0}")]
    InvalidOutput(String),
}

/// Diarization seam; the engine holds a trait object.
#[async_trait]
pub trait Diarize: Send + Sync {
    /// Produce ordered speaker intervals for one audio file.
    ///
    /// # Errors
    ///
    /// Returns `DiarizeError`; callers treat every variant as non-fatal.
    async fn diarize(&self, audio_path: &Path) -> Result<Vec<SpeakerSegment>, DiarizeError>;
}

/// Diarizer that shells out to a helper process wrapping the neural model.
#[derive(Debug)]
pub struct HelperDiarizer {
    helper_bin: String,
    model: String,
    hub_token: String,
    ready: OnceCell<()>,
}

impl HelperDiarizer {
    /// Build a diarizer from the model-hub token.
    ///
    /// # Errors
    ///
    /// Returns `DiarizeError::ModelLoad` when the token is empty.
    pub fn new(hub_token: impl Into<String>) -> Result<Self, DiarizeError> {
        let hub_token = hub_token.into();
        if hub_token.is_empty() {
            return Err(DiarizeError::ModelLoad(
                "model-hub token is required".to_string(),
            ));
        }
        Ok(Self {
            helper_bin: std::env::var("VOXFLOW_DIARIZER_BIN")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_HELPER_BIN.to_string()),
            model: std::env::var("VOXFLOW_DIARIZER_MODEL")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            hub_token,
            ready: OnceCell::new(),
        })
    }

    /// Verify the helper can load the model; runs once per process.
    async fn ensure_ready(&self) -> Result<(), DiarizeError> {
        self.ready
            .get_or_try_init(|| async {
                info!(model = %self.model, "loading diarization model");
                let output = Command::new(&self.helper_bin)
                    .args(["--model", &self.model, "--check"])
                    .env("HUB_TOKEN", &self.hub_token)
                    .stdin(Stdio::null())
                    .stderr(Stdio::piped())
                    .output()
                    .await
                    .map_err(|e| {
                        DiarizeError::ModelLoad(format!(
                            "failed to spawn helper '{}': {e}",
                            self.helper_bin
                        ))
                    })?;
                if !output.status.success() {
                    return Err(DiarizeError::ModelLoad(format!(
                        "model '{}' failed to load: {}",
                        self.model,
                        String::from_utf8_lossy(&output.stderr).trim()
                    )));
                }
                info!(model = %self.model, "diarization model ready");
                Ok(())
            })
            .await
            .copied()
    }
}

#[async_trait]
impl Diarize for HelperDiarizer {
    async fn diarize(&self, audio_path: &Path) -> Result<Vec<SpeakerSegment>, DiarizeError> {
        self.ensure_ready().await?;

        debug!(audio = %audio_path.display(), "running diarization");
        let output = Command::new(&self.helper_bin)
            .args(["--model", &self.model])
            .arg(audio_path)
            .env("HUB_TOKEN", &self.hub_token)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| DiarizeError::Inference(format!("failed to spawn helper: {e}")))?;

        if !output.status.success() {
            return Err(DiarizeError::Inference(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }

        let raw: Vec<RawInterval> = serde_json::from_slice(&output.stdout)
            .map_err(|e| DiarizeError::InvalidOutput(e.to_string()))?;

        let mut segments: Vec<SpeakerSegment> = raw
            .into_iter()
            .map(|interval| SpeakerSegment {
                speaker: normalize_label(&interval.speaker),
                start: interval.start,
                end: interval.end,
            })
            .collect();
        segments.sort_by(|a, b| a.start.total_cmp(&b.start));
        Ok(segments)
    }
}

/// Stand-in used when the model-hub token is not configured. Every call
/// fails with a model-load error, which the runner records on the
/// diarization stage before substituting a single speaker.
pub struct DisabledDiarizer;

#[async_trait]
impl Diarize for DisabledDiarizer {
    async fn diarize(&self, _audio_path: &Path) -> Result<Vec<SpeakerSegment>, DiarizeError> {
        Err(DiarizeError::ModelLoad(
            "HUGGINGFACE_TOKEN not set, diarization is disabled".to_string(),
        ))
    }
}

#[derive(Debug, Deserialize)]
struct RawInterval {
    speaker: String,
    start: f64,
    end: f64,
}

/// Normalize any helper label to `SPEAKER_XX`.
fn normalize_label(label: &str) -> String {
    let number = LABEL_NUM_RE
        .find(label)
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .unwrap_or_else(|| {
            // Single letters map A -> 0, B -> 1, ...
            let mut chars = label.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if c.is_ascii_alphabetic() => {
                    c.to_ascii_uppercase() as u32 - 'A' as u32
                }
                _ => 0,
            }
        });
    format!("SPEAKER_{number:02}")
}
