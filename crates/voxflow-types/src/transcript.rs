use serde::{Deserialize, Serialize};

/// One timed segment of ASR output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranscriptSegment {
    pub id: i64,
    /// Start offset in seconds.
    pub start: f64,
    /// End offset in seconds.
    pub end: f64,
    pub text: String,
}

/// The durable ASR artifact persisted as `transcription.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    pub segments: Vec<TranscriptSegment>,
    pub language: String,
    /// Audio duration in seconds, derived from the last segment end when
    /// the service does not report one.
    pub duration: f64,
}

/// One speaker interval from diarization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerSegment {
    /// Normalized label, `SPEAKER_00`, `SPEAKER_01`, ...
    pub speaker: String,
    pub start: f64,
    pub end: f64,
}

/// An ASR segment with its assigned speaker after merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabeledSegment {
    pub speaker: String,
    pub start: f64,
    pub end: f64,
    pub text: String,
}

impl Transcription {
    /// An empty transcription, useful as a fallback artifact.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            text: String::new(),
            segments: Vec::new(),
            language: "unknown".to_string(),
            duration: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcription_json_round_trip() {
        let t = Transcription {
            text: "hello world".into(),
            segments: vec![TranscriptSegment {
                id: 0,
                start: 0.0,
                end: 2.5,
                text: "hello world".into(),
            }],
            language: "en".into(),
            duration: 2.5,
        };
        let json = serde_json::to_string(&t).unwrap();
        let back: Transcription = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
