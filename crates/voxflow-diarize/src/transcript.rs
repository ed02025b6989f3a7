//! Transcript text builders
//!
//! The raw timestamped form feeds profile pipelines; the speaker-labeled
//! form feeds the default pipeline's formatting stage.

use voxflow_types::{LabeledSegment, TranscriptSegment};

/// Format seconds as `HH:MM:SS`.
#[must_use]
pub fn format_timestamp(seconds: f64) -> String {
    let total = seconds.max(0.0) as u64;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Build a `[HH:MM:SS] text` line per non-empty segment.
#[must_use]
pub fn raw_transcript(segments: &[TranscriptSegment]) -> String {
    let lines: Vec<String> = segments
        .iter()
        .filter(|seg| !seg.text.trim().is_empty())
        .map(|seg| format!("[{}] {}", format_timestamp(seg.start), seg.text.trim()))
        .collect();
    lines.join("\n")
}

/// Build a transcript with `**SPEAKER_XX:**` blocks, opening a new block
/// whenever the speaker changes.
#[must_use]
pub fn speaker_transcript(segments: &[LabeledSegment]) -> String {
    let mut lines: Vec<String> = Vec::new();
    let mut current_speaker: Option<&str> = None;
    let mut current_text: Vec<&str> = Vec::new();

    for segment in segments {
        let text = segment.text.trim();
        if text.is_empty() {
            continue;
        }
        if current_speaker != Some(segment.speaker.as_str()) {
            if !current_text.is_empty() {
                lines.push(current_text.join(" "));
                lines.push(String::new());
            }
            lines.push(format!("**{}:**", segment.speaker));
            current_speaker = Some(segment.speaker.as_str());
            current_text.clear();
        }
        current_text.push(text);
    }
    if !current_text.is_empty() {
        lines.push(current_text.join(" "));
    }

    lines.join("\n")
}
