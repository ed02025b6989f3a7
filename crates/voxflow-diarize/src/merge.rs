//! Merge ASR segments with speaker intervals
//!
//! Each ASR segment is assigned the speaker whose summed overlap covers at
//! least half of the segment's duration; anything below the threshold is
//! `UNKNOWN`. Consecutive same-speaker segments then collapse into one.

use tracing::debug;

use voxflow_types::{LabeledSegment, SpeakerSegment, TranscriptSegment};

/// Minimum share of a segment's duration a speaker must cover.
const MIN_OVERLAP_RATIO: f64 = 0.5;

const SINGLE_SPEAKER: &str = "SPEAKER_00";
const UNKNOWN_SPEAKER: &str = "UNKNOWN";

fn overlap(start1: f64, end1: f64, start2: f64, end2: f64) -> f64 {
    (end1.min(end2) - start1.max(start2)).max(0.0)
}

fn best_speaker(segment: &TranscriptSegment, speakers: &[SpeakerSegment]) -> Option<String> {
    let duration = segment.end - segment.start;
    if duration <= 0.0 {
        return None;
    }

    // Sum overlaps per speaker so split diarization intervals still count.
    // First-seen order is kept so an exact tie resolves to the speaker
    // encountered first in the interval list.
    let mut totals: Vec<(&str, f64)> = Vec::new();
    for spk in speakers {
        let o = overlap(segment.start, segment.end, spk.start, spk.end);
        if o > 0.0 {
            match totals.iter_mut().find(|(name, _)| *name == spk.speaker) {
                Some((_, sum)) => *sum += o,
                None => totals.push((spk.speaker.as_str(), o)),
            }
        }
    }

    let mut best: Option<(&str, f64)> = None;
    for &(name, covered) in &totals {
        let wins = match best {
            Some((_, best_covered)) => covered > best_covered,
            None => true,
        };
        if wins {
            best = Some((name, covered));
        }
    }

    let (speaker, covered) = best?;
    (covered / duration >= MIN_OVERLAP_RATIO).then(|| speaker.to_string())
}

fn collapse(segments: Vec<LabeledSegment>) -> Vec<LabeledSegment> {
    let mut merged: Vec<LabeledSegment> = Vec::new();
    for segment in segments {
        match merged.last_mut() {
            Some(last) if last.speaker == segment.speaker => {
                last.end = segment.end;
                if !last.text.is_empty() && !segment.text.is_empty() {
                    last.text = format!("{} {}", last.text, segment.text);
                } else {
                    last.text = format!("{}{}", last.text, segment.text).trim().to_string();
                }
            }
            _ => merged.push(segment),
        }
    }
    merged
}

/// Merge ASR segments with diarization intervals into speaker-labeled
/// segments.
///
/// Edge cases: empty ASR input yields an empty output; empty diarization
/// assigns everything to `SPEAKER_00` preserving texts and intervals;
/// zero-duration ASR segments come out `UNKNOWN`.
#[must_use]
pub fn merge_transcript_with_speakers(
    asr_segments: &[TranscriptSegment],
    speaker_segments: &[SpeakerSegment],
) -> Vec<LabeledSegment> {
    if asr_segments.is_empty() {
        return Vec::new();
    }

    if speaker_segments.is_empty() {
        return asr_segments
            .iter()
            .map(|seg| LabeledSegment {
                speaker: SINGLE_SPEAKER.to_string(),
                start: seg.start,
                end: seg.end,
                text: seg.text.clone(),
            })
            .collect();
    }

    let mut sorted_asr: Vec<&TranscriptSegment> = asr_segments.iter().collect();
    sorted_asr.sort_by(|a, b| a.start.total_cmp(&b.start));
    let mut sorted_speakers: Vec<SpeakerSegment> = speaker_segments.to_vec();
    sorted_speakers.sort_by(|a, b| a.start.total_cmp(&b.start));

    let labeled: Vec<LabeledSegment> = sorted_asr
        .into_iter()
        .map(|seg| LabeledSegment {
            speaker: best_speaker(seg, &sorted_speakers)
                .unwrap_or_else(|| UNKNOWN_SPEAKER.to_string()),
            start: seg.start,
            end: seg.end,
            text: seg.text.clone(),
        })
        .collect();

    let result = collapse(labeled);
    debug!(
        asr = asr_segments.len(),
        speakers = speaker_segments.len(),
        merged = result.len(),
        "merged transcript with speakers"
    );
    result
}
