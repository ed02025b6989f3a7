//! Speaker diarization and transcript merging
//!
//! The diarizer runs a local neural-diarization helper once per file and
//! normalizes its speaker labels. The merge is pure: it assigns each ASR
//! segment to the speaker with the dominant overlap and collapses
//! consecutive same-speaker runs. Diarization failure is never fatal to a
//! job; callers substitute a single whole-audio speaker.

mod diarizer;
mod merge;
mod transcript;

pub use diarizer::{Diarize, DiarizeError, DisabledDiarizer, HelperDiarizer};
pub use merge::merge_transcript_with_speakers;
pub use transcript::{raw_transcript, speaker_transcript, format_timestamp};
