//! The job runner state machine
//!
//! One instance per worker process. Jobs are claimed one at a time and run
//! to a terminal state before the next claim; stages within a job are
//! strictly ordered. Every stage transition is persisted before and after
//! execution, which is what makes a restart resume from the first
//! incomplete stage instead of re-running (and re-billing) finished work.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use voxflow_asr::Transcribe;
use voxflow_config::Config;
use voxflow_diarize::{
    merge_transcript_with_speakers, raw_transcript, speaker_transcript, Diarize,
};
use voxflow_llm::{estimate_cost, ChatBackend, ChatRequest};
use voxflow_profiles::{Profile, ProfileRegistry};
use voxflow_store::{JobStore, StageUpdate, StoreError};
use voxflow_types::{
    is_builtin_note_type, Job, JobEvent, JobStatus, SpeakerSegment, StageDetail, StageStatus,
    Transcription, STAGE_DIARIZATION, STAGE_FORMATTING, STAGE_OUTPUT, STAGE_TRANSCRIPTION,
};

use crate::bus::EventBus;
use crate::error::EngineError;
use crate::notify::Notifier;
use crate::output::{OutputFile, OutputMetadata, OutputWriter};
use crate::prompts::builtin_prompt;

/// Model used by the default pipeline's formatting stage.
const DEFAULT_FORMAT_MODEL: &str = "deepseek-chat";
const DEFAULT_FORMAT_TEMPERATURE: f32 = 0.3;
const DEFAULT_FORMAT_MAX_TOKENS: u32 = 4096;
const DEFAULT_FORMAT_TIMEOUT: Duration = Duration::from_secs(120);

struct RunOutcome {
    outputs: Vec<OutputFile>,
    source: PathBuf,
    base_name: String,
    profile: Option<Arc<Profile>>,
}

/// The worker's job execution engine.
pub struct JobRunner {
    store: Arc<JobStore>,
    registry: Arc<ProfileRegistry>,
    config: Arc<Config>,
    bus: EventBus,
    transcriber: Arc<dyn Transcribe>,
    diarizer: Arc<dyn Diarize>,
    chat: Arc<dyn ChatBackend>,
    output: OutputWriter,
    notifier: Notifier,
}

impl JobRunner {
    /// Assemble the runner from its collaborators.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Io` when the output directories cannot be
    /// created.
    pub fn new(
        store: Arc<JobStore>,
        registry: Arc<ProfileRegistry>,
        config: Arc<Config>,
        bus: EventBus,
        transcriber: Arc<dyn Transcribe>,
        diarizer: Arc<dyn Diarize>,
        chat: Arc<dyn ChatBackend>,
    ) -> Result<Self, EngineError> {
        let output = OutputWriter::new(&config.output_dir)
            .map_err(|e| EngineError::io(&config.output_dir, e))?;
        Ok(Self {
            store,
            registry,
            config,
            bus,
            transcriber,
            diarizer,
            chat,
            output,
            notifier: Notifier::new(),
        })
    }

    /// Claim and process jobs until shutdown. On startup any job stranded
    /// in PROCESSING by a dead worker is requeued with its stage rows kept.
    pub async fn run_loop(&self, mut shutdown: watch::Receiver<bool>) {
        match self.store.reset_orphans() {
            Ok(0) => {}
            Ok(count) => info!(count, "requeued orphaned jobs, they will resume"),
            Err(e) => error!(error = %e, "failed to reset orphaned jobs"),
        }

        let poll = Duration::from_secs(self.config.poll_interval_secs.max(1));
        loop {
            if *shutdown.borrow() {
                info!("worker shutting down");
                return;
            }
            match self.store.claim_next() {
                Ok(Some(job)) => self.process(job).await,
                Ok(None) => {
                    tokio::select! {
                        _ = tokio::time::sleep(poll) => {}
                        _ = shutdown.changed() => {}
                    }
                }
                Err(e) => {
                    error!(error = %e, "claim failed, backing off");
                    tokio::time::sleep(poll).await;
                }
            }
        }
    }

    /// Run one claimed job to a terminal state.
    pub async fn process(&self, job: Job) {
        info!(job_id = %job.id, profile_id = %job.profile_id, "processing job");
        self.publish_job(&job.id).await;

        match self.run_job(&job).await {
            Ok(outcome) => self.complete(&job, outcome).await,
            Err(EngineError::Cancelled) => {
                info!(job_id = %job.id, "job cancelled, halted at stage boundary");
                self.publish_job(&job.id).await;
            }
            Err(e) => self.fail(&job, &e).await,
        }
    }

    async fn complete(&self, job: &Job, outcome: RunOutcome) {
        let final_job = match self.store.finalize_job(&job.id, JobStatus::Complete, None) {
            Ok(final_job) => final_job,
            Err(StoreError::AlreadyTerminal { status, .. }) => {
                info!(job_id = %job.id, %status, "job reached a terminal state elsewhere");
                return;
            }
            Err(e) => {
                error!(job_id = %job.id, error = %e, "failed to finalize job");
                return;
            }
        };
        self.publish_job(&job.id).await;
        info!(
            job_id = %job.id,
            cost = final_job.cost_estimate,
            outputs = outcome.outputs.len(),
            "job complete"
        );

        if let Some(profile) = &outcome.profile {
            if let Some(notifications) = &profile.notifications {
                if notifications.any_configured() {
                    self.notifier
                        .send_all(
                            notifications,
                            &profile.id,
                            &outcome.base_name,
                            &outcome.outputs,
                            final_job.cost_estimate,
                        )
                        .await;
                }
            }
        }

        self.archive_source(&outcome.source, &outcome.outputs);
    }

    async fn fail(&self, job: &Job, e: &EngineError) {
        error!(job_id = %job.id, error = %e, "job failed");
        match self.store.finalize_job(&job.id, JobStatus::Failed, Some(&e.to_string())) {
            Ok(_) | Err(StoreError::AlreadyTerminal { .. }) => {}
            Err(store_err) => {
                error!(job_id = %job.id, error = %store_err, "failed to record job failure")
            }
        }
        self.publish_job(&job.id).await;

        // Preserve the source for recovery; completed stage artifacts stay
        // on disk for inspection.
        let source = self.current_source_location(job);
        if source.exists() {
            let dest = self.config.errors_dir().join(file_name_of(&source));
            match move_file(&source, &dest) {
                Ok(()) => info!(path = %dest.display(), "source moved to errors directory"),
                Err(move_err) => {
                    error!(error = %move_err, "failed to move source to errors directory")
                }
            }
        }
    }

    async fn run_job(&self, job: &Job) -> Result<RunOutcome, EngineError> {
        let source = self.secure_source(job)?;
        let base_name = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| job.id.clone());

        let transcription = self.run_transcription_stage(job, &source).await?;
        self.check_cancelled(&job.id)?;

        // Anything without a profile definition runs the default pipeline;
        // that covers the built-in note types and a profile deleted while
        // the job sat in the queue.
        let profile = self.registry.get(&job.profile_id);
        let outputs = match &profile {
            Some(profile) => {
                self.run_profile_pipeline(job, &transcription, profile, &base_name)
                    .await?
            }
            None => {
                self.run_default_pipeline(job, &source, &transcription, &base_name)
                    .await?
            }
        };

        Ok(RunOutcome {
            outputs,
            source,
            base_name,
            profile,
        })
    }

    /// Move the source into quarantine on the first processing attempt so
    /// a crash preserves it; later attempts find it there already.
    fn secure_source(&self, job: &Job) -> Result<PathBuf, EngineError> {
        let original = PathBuf::from(&job.source_path);
        let quarantined = self.config.quarantine_dir().join(file_name_of(&original));

        if quarantined.exists() {
            info!(job_id = %job.id, path = %quarantined.display(), "source found in quarantine");
            return Ok(quarantined);
        }
        if original.exists() {
            return match move_file(&original, &quarantined) {
                Ok(()) => {
                    info!(job_id = %job.id, path = %quarantined.display(), "source moved to quarantine");
                    Ok(quarantined)
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "could not quarantine source, using original");
                    Ok(original)
                }
            };
        }
        Err(EngineError::FileMissing { path: original })
    }

    fn current_source_location(&self, job: &Job) -> PathBuf {
        let original = PathBuf::from(&job.source_path);
        let quarantined = self.config.quarantine_dir().join(file_name_of(&original));
        if quarantined.exists() {
            quarantined
        } else {
            original
        }
    }

    async fn run_transcription_stage(
        &self,
        job: &Job,
        source: &Path,
    ) -> Result<Transcription, EngineError> {
        if let Some(cached) = self.cached_artifact(&job.id, STAGE_TRANSCRIPTION)? {
            match serde_json::from_str::<Transcription>(&cached) {
                Ok(t) => {
                    info!(job_id = %job.id, "resuming with cached transcription");
                    return Ok(t);
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "cached transcription unreadable, re-running");
                }
            }
        }

        self.record_stage(&job.id, STAGE_TRANSCRIPTION, StageStatus::Running, StageUpdate::default())
            .await?;

        let transcription = match self.transcriber.transcribe(source).await {
            Ok(t) => t,
            Err(e) => {
                let message = e.to_string();
                self.record_stage(
                    &job.id,
                    STAGE_TRANSCRIPTION,
                    StageStatus::Failed,
                    StageUpdate {
                        error: Some(message.clone()),
                        ..StageUpdate::default()
                    },
                )
                .await?;
                return Err(EngineError::StageFailed {
                    stage: STAGE_TRANSCRIPTION.to_string(),
                    message,
                });
            }
        };

        let artifact = self.stage_artifact_path(&job.id, "transcription.json")?;
        let json = serde_json::to_string(&transcription)
            .map_err(|e| EngineError::io(&artifact, std::io::Error::other(e)))?;
        std::fs::write(&artifact, json).map_err(|e| EngineError::io(&artifact, e))?;

        self.record_stage(
            &job.id,
            STAGE_TRANSCRIPTION,
            StageStatus::Complete,
            StageUpdate {
                output_path: Some(artifact.to_string_lossy().into_owned()),
                ..StageUpdate::default()
            },
        )
        .await?;
        Ok(transcription)
    }

    async fn run_profile_pipeline(
        &self,
        job: &Job,
        transcription: &Transcription,
        profile: &Profile,
        base_name: &str,
    ) -> Result<Vec<OutputFile>, EngineError> {
        info!(job_id = %job.id, profile_id = %profile.id, stages = profile.stages.len(), "running profile pipeline");

        let mut current_input = raw_transcript(&transcription.segments);
        let mut previous: HashMap<String, String> = HashMap::new();

        for stage in &profile.stages {
            self.check_cancelled(&job.id)?;

            if let Some(cached) = self.cached_artifact(&job.id, &stage.name)? {
                info!(job_id = %job.id, stage = %stage.name, "stage already complete, loading cached output");
                previous.insert(stage.name.clone(), cached.clone());
                current_input = cached;
                continue;
            }

            self.record_stage(
                &job.id,
                &stage.name,
                StageStatus::Running,
                StageUpdate {
                    model_used: Some(stage.model.clone()),
                    ..StageUpdate::default()
                },
            )
            .await?;

            let prompt = build_prompt(&stage.prompt_template, &current_input, &previous);
            let request = ChatRequest {
                model: stage.model.clone(),
                provider_hint: stage.provider.clone(),
                system_message: stage.system_message.clone(),
                prompt,
                temperature: stage.temperature,
                max_tokens: stage.max_tokens,
                timeout: Duration::from_secs(stage.timeout_secs),
            };

            match self.chat.complete(request).await {
                Ok(outcome) => {
                    let cost =
                        estimate_cost(&stage.model, outcome.input_tokens, outcome.output_tokens);
                    let artifact =
                        self.stage_artifact_path(&job.id, &format!("stage_{}.txt", stage.name))?;
                    std::fs::write(&artifact, &outcome.content)
                        .map_err(|e| EngineError::io(&artifact, e))?;

                    self.record_stage(
                        &job.id,
                        &stage.name,
                        StageStatus::Complete,
                        StageUpdate {
                            model_used: Some(stage.model.clone()),
                            input_tokens: Some(outcome.input_tokens),
                            output_tokens: Some(outcome.output_tokens),
                            cost_estimate: Some(cost),
                            output_path: Some(artifact.to_string_lossy().into_owned()),
                            ..StageUpdate::default()
                        },
                    )
                    .await?;
                    info!(
                        job_id = %job.id,
                        stage = %stage.name,
                        chars = outcome.content.len(),
                        cost,
                        "stage complete"
                    );

                    previous.insert(stage.name.clone(), outcome.content.clone());
                    current_input = outcome.content;
                }
                Err(e) => {
                    let message = e.to_string();
                    error!(job_id = %job.id, stage = %stage.name, error = %message, "stage failed");
                    self.record_stage(
                        &job.id,
                        &stage.name,
                        StageStatus::Failed,
                        StageUpdate {
                            model_used: Some(stage.model.clone()),
                            error: Some(message.clone()),
                            ..StageUpdate::default()
                        },
                    )
                    .await?;
                    // The job fails here; the next run resumes at this stage.
                    return Err(EngineError::StageFailed {
                        stage: stage.name.clone(),
                        message,
                    });
                }
            }
        }

        self.record_stage(&job.id, STAGE_OUTPUT, StageStatus::Running, StageUpdate::default())
            .await?;

        let docs_dir = self.output.docs_dir_for(
            profile
                .routing
                .as_ref()
                .map(|r| r.subfolder.as_str())
                .filter(|s| !s.is_empty()),
        );
        let metadata = OutputMetadata {
            duration_secs: transcription.duration,
            profile: Some(profile.id.clone()),
        };

        let mut outputs = Vec::new();
        for stage in &profile.stages {
            if !stage.save_intermediate {
                continue;
            }
            let Some(content) = previous.get(&stage.name) else {
                continue;
            };
            let written = self
                .output
                .write_stage_output(
                    content,
                    base_name,
                    &stage.filename_suffix,
                    &stage.name,
                    &metadata,
                    &docs_dir,
                )
                .await
                .map_err(|e| EngineError::io(&docs_dir, e))?;
            outputs.extend(written);
        }

        self.record_stage(&job.id, STAGE_OUTPUT, StageStatus::Complete, StageUpdate::default())
            .await?;
        Ok(outputs)
    }

    async fn run_default_pipeline(
        &self,
        job: &Job,
        source: &Path,
        transcription: &Transcription,
        base_name: &str,
    ) -> Result<Vec<OutputFile>, EngineError> {
        let note_type = if is_builtin_note_type(&job.profile_id) {
            job.profile_id.as_str()
        } else {
            "meeting"
        };
        info!(job_id = %job.id, note_type, "running default pipeline");

        self.check_cancelled(&job.id)?;
        self.record_stage(&job.id, STAGE_DIARIZATION, StageStatus::Running, StageUpdate::default())
            .await?;
        let speakers = match self.diarizer.diarize(source).await {
            Ok(segments) => {
                self.record_stage(
                    &job.id,
                    STAGE_DIARIZATION,
                    StageStatus::Complete,
                    StageUpdate::default(),
                )
                .await?;
                segments
            }
            Err(e) => {
                // Non-fatal: fall back to one speaker spanning the audio.
                warn!(job_id = %job.id, error = %e, "diarization failed, using single speaker");
                self.record_stage(
                    &job.id,
                    STAGE_DIARIZATION,
                    StageStatus::Failed,
                    StageUpdate {
                        error: Some(e.to_string()),
                        ..StageUpdate::default()
                    },
                )
                .await?;
                vec![SpeakerSegment {
                    speaker: "SPEAKER_00".to_string(),
                    start: 0.0,
                    end: transcription.duration,
                }]
            }
        };

        let merged = merge_transcript_with_speakers(&transcription.segments, &speakers);
        let transcript_text = speaker_transcript(&merged);

        self.check_cancelled(&job.id)?;
        let formatted = if let Some(cached) = self.cached_artifact(&job.id, STAGE_FORMATTING)? {
            info!(job_id = %job.id, "formatting already complete, loading cached output");
            cached
        } else {
            self.record_stage(
                &job.id,
                STAGE_FORMATTING,
                StageStatus::Running,
                StageUpdate {
                    model_used: Some(DEFAULT_FORMAT_MODEL.to_string()),
                    ..StageUpdate::default()
                },
            )
            .await?;

            let template = self.standard_prompt(note_type);
            let request = ChatRequest {
                model: DEFAULT_FORMAT_MODEL.to_string(),
                provider_hint: None,
                system_message: "You are a helpful assistant.".to_string(),
                prompt: template.replace("{transcript}", &transcript_text),
                temperature: DEFAULT_FORMAT_TEMPERATURE,
                max_tokens: DEFAULT_FORMAT_MAX_TOKENS,
                timeout: DEFAULT_FORMAT_TIMEOUT,
            };

            match self.chat.complete(request).await {
                Ok(outcome) => {
                    let cost = estimate_cost(
                        DEFAULT_FORMAT_MODEL,
                        outcome.input_tokens,
                        outcome.output_tokens,
                    );
                    let artifact = self.stage_artifact_path(&job.id, "stage_formatting.txt")?;
                    std::fs::write(&artifact, &outcome.content)
                        .map_err(|e| EngineError::io(&artifact, e))?;
                    self.record_stage(
                        &job.id,
                        STAGE_FORMATTING,
                        StageStatus::Complete,
                        StageUpdate {
                            model_used: Some(DEFAULT_FORMAT_MODEL.to_string()),
                            input_tokens: Some(outcome.input_tokens),
                            output_tokens: Some(outcome.output_tokens),
                            cost_estimate: Some(cost),
                            output_path: Some(artifact.to_string_lossy().into_owned()),
                            ..StageUpdate::default()
                        },
                    )
                    .await?;
                    outcome.content
                }
                Err(e) => {
                    // The raw speaker transcript still makes a usable note.
                    warn!(job_id = %job.id, error = %e, "formatting failed, keeping raw transcript");
                    self.record_stage(
                        &job.id,
                        STAGE_FORMATTING,
                        StageStatus::Failed,
                        StageUpdate {
                            model_used: Some(DEFAULT_FORMAT_MODEL.to_string()),
                            error: Some(e.to_string()),
                            ..StageUpdate::default()
                        },
                    )
                    .await?;
                    transcript_text.clone()
                }
            }
        };

        self.record_stage(&job.id, STAGE_OUTPUT, StageStatus::Running, StageUpdate::default())
            .await?;
        let metadata = OutputMetadata {
            duration_secs: transcription.duration,
            profile: None,
        };
        let outputs = self
            .output
            .write_note_output(&formatted, note_type, base_name, &metadata)
            .await
            .map_err(|e| EngineError::io(&self.config.output_dir, e))?;
        self.record_stage(&job.id, STAGE_OUTPUT, StageStatus::Complete, StageUpdate::default())
            .await?;
        Ok(outputs)
    }

    /// Built-in note-type template, overridable by a file under
    /// `<config>/prompts/standard/<type>.md`.
    fn standard_prompt(&self, note_type: &str) -> String {
        let override_path = self
            .config
            .prompts_dir()
            .join("standard")
            .join(format!("{note_type}.md"));
        if override_path.exists() {
            match std::fs::read_to_string(&override_path) {
                Ok(body) => return body,
                Err(e) => {
                    warn!(path = %override_path.display(), error = %e, "failed to read prompt override")
                }
            }
        }
        builtin_prompt(note_type)
            .or_else(|| builtin_prompt("meeting"))
            .unwrap_or("{transcript}")
            .to_string()
    }

    /// Load a COMPLETE stage's artifact, or `None` when the stage must
    /// (re-)execute. A row whose artifact is missing or unreadable counts
    /// as incomplete.
    fn cached_artifact(&self, job_id: &str, stage_id: &str) -> Result<Option<String>, EngineError> {
        let Some(row) = self.store.get_stage(job_id, stage_id)? else {
            return Ok(None);
        };
        if row.status != StageStatus::Complete {
            return Ok(None);
        }
        let Some(path) = row.output_path.as_deref() else {
            return Ok(None);
        };
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(Some(content)),
            Err(e) => {
                warn!(job_id, stage_id, path, error = %e, "stage artifact missing, stage will re-run");
                Ok(None)
            }
        }
    }

    fn stage_artifact_path(&self, job_id: &str, file_name: &str) -> Result<PathBuf, EngineError> {
        let dir = self.config.job_data_dir(job_id);
        std::fs::create_dir_all(&dir).map_err(|e| EngineError::io(&dir, e))?;
        Ok(dir.join(file_name))
    }

    fn check_cancelled(&self, job_id: &str) -> Result<(), EngineError> {
        match self.store.job_status(job_id) {
            Ok(JobStatus::Cancelled) => Err(EngineError::Cancelled),
            Ok(_) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn record_stage(
        &self,
        job_id: &str,
        stage_id: &str,
        status: StageStatus,
        update: StageUpdate,
    ) -> Result<(), EngineError> {
        let model = update.model_used.clone();
        self.store.upsert_stage(job_id, stage_id, status, update)?;
        if let Ok(Some(job)) = self.store.get_job(job_id) {
            let event = JobEvent::from_job(&job).with_stage_detail(StageDetail {
                stage_id: stage_id.to_string(),
                stage_status: status,
                model_used: model,
            });
            self.bus.publish(event).await;
        }
        Ok(())
    }

    async fn publish_job(&self, job_id: &str) {
        if let Ok(Some(job)) = self.store.get_job(job_id) {
            self.bus.publish(JobEvent::from_job(&job)).await;
        }
    }

    /// Archive the source once at least one output is verified on disk;
    /// unverified outputs archive too (never delete), with a warning.
    fn archive_source(&self, source: &Path, outputs: &[OutputFile]) {
        if !outputs.iter().any(|o| o.path.exists()) {
            warn!("no output file could be verified on disk, archiving source anyway");
        }
        if !source.exists() {
            return;
        }
        let dest = self.config.archive_dir().join(file_name_of(source));
        match move_file(source, &dest) {
            Ok(()) => info!(path = %dest.display(), "source archived"),
            Err(e) => error!(error = %e, "failed to archive source"),
        }
    }
}

/// Literal placeholder substitution; braces inside the transcript are never
/// interpreted. `{cleaned_transcript}` pulls a prior `clean` stage's output
/// when one exists and otherwise the current input, so the placeholder is
/// never left in the prompt.
fn build_prompt(
    template: &str,
    current_input: &str,
    previous: &HashMap<String, String>,
) -> String {
    let mut prompt = template.replace("{transcript}", current_input);
    if template.contains("{cleaned_transcript}") {
        let cleaned = previous
            .get("clean")
            .map(String::as_str)
            .unwrap_or(current_input);
        prompt = prompt.replace("{cleaned_transcript}", cleaned);
    }
    prompt
}

fn file_name_of(path: &Path) -> std::ffi::OsString {
    path.file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_else(|| std::ffi::OsString::from("source"))
}

/// Rename with a copy-and-delete fallback for cross-device moves.
fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent)?;
    }
    match std::fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(_) => {
            std::fs::copy(from, to)?;
            std::fs::remove_file(from)
        }
    }
}
