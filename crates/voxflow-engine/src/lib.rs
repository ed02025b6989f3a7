//! The durable job execution engine
//!
//! One worker task claims queued jobs and walks each through its pipeline,
//! persisting every stage transition so a crash or restart resumes from the
//! first incomplete stage. Every transition is also published on the event
//! bus for streaming subscribers. Output writing and notification fan-out
//! live here because they are steps of the job lifecycle, not services of
//! their own.

mod bus;
mod error;
mod notify;
mod output;
mod prompts;
mod runner;

pub use bus::{EventBus, JOB_UPDATES_CHANNEL};
pub use error::EngineError;
pub use notify::Notifier;
pub use output::{OutputFile, OutputMetadata, OutputWriter};
pub use prompts::builtin_prompt;
pub use runner::JobRunner;
