//! Remote ASR transcription
//!
//! Uploads audio to a whisper-family endpoint as multipart form data and
//! normalizes the response into the durable `Transcription` artifact. Files
//! over the service's 25 MB upload limit are transcoded to mono OGG first.

mod compress;
mod error;
mod transcriber;

pub use compress::needs_compression;
pub use error::AsrError;
pub use transcriber::{parse_response, RawResponse, Transcribe, WhisperTranscriber, MAX_UPLOAD_BYTES};
