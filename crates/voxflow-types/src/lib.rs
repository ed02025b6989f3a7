//! Core domain types shared across the voxflow workspace
//!
//! Everything the store persists, the runner mutates, and the event bus
//! publishes is defined here so the other crates agree on one vocabulary.

mod event;
mod job;
mod stage;
mod transcript;

pub use event::{JobEvent, StageDetail};
pub use job::{Job, JobStatus};
pub use stage::{StageResult, StageStatus};
pub use transcript::{LabeledSegment, SpeakerSegment, Transcription, TranscriptSegment};

/// Stage id used by the ASR step in every pipeline.
pub const STAGE_TRANSCRIPTION: &str = "transcription";
/// Stage id used by the diarization step of the default pipeline.
pub const STAGE_DIARIZATION: &str = "diarization";
/// Stage id used by the single LLM step of the default pipeline.
pub const STAGE_FORMATTING: &str = "formatting";
/// Stage id recorded when output files have been written.
pub const STAGE_OUTPUT: &str = "output";

/// Built-in note types accepted as a `profile_id` without a profile file.
///
/// Jobs submitted under one of these labels run the default pipeline
/// (diarize, merge, single formatting call) instead of a profile's stage list.
pub const BUILTIN_NOTE_TYPES: &[&str] = &["meeting", "supervision", "client", "lecture", "braindump"];

/// Whether a profile id names one of the built-in note types.
#[must_use]
pub fn is_builtin_note_type(profile_id: &str) -> bool {
    BUILTIN_NOTE_TYPES.contains(&profile_id)
}
