//! voxflow — durable transcription pipeline
//!
//! One binary, three roles: the HTTP intake API (`serve`), the processing
//! worker (`worker`), and a configuration check (`check`). Server and
//! worker share the sqlite store; run one of each.

use std::process::Stdio;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use voxflow_asr::{Transcribe, WhisperTranscriber};
use voxflow_config::Config;
use voxflow_diarize::{Diarize, DisabledDiarizer, HelperDiarizer};
use voxflow_engine::{EventBus, JobRunner};
use voxflow_llm::HttpChatClient;
use voxflow_profiles::ProfileRegistry;
use voxflow_server::AppState;
use voxflow_store::JobStore;

#[derive(Parser)]
#[command(name = "voxflow", version, about = "Durable audio transcription and LLM processing pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose logging (RUST_LOG overrides).
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP intake API.
    Serve,
    /// Run the job processing worker.
    Worker,
    /// Report external-service configuration and exit.
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let config = Arc::new(Config::from_env());
    config
        .ensure_directories()
        .context("failed to create working directories")?;

    match cli.command {
        Command::Serve => serve(config).await,
        Command::Worker => worker(config).await,
        Command::Check => check(&config).await,
    }
}

fn init_tracing(verbose: bool) -> Result<()> {
    let default_filter = if verbose { "voxflow=debug,info" } else { "voxflow=info,warn" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .context("invalid log filter")?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
    Ok(())
}

async fn serve(config: Arc<Config>) -> Result<()> {
    let store = Arc::new(JobStore::open(&config.db_path()).context("failed to open job store")?);
    let registry = Arc::new(
        ProfileRegistry::open(config.profiles_dir(), config.prompts_dir())
            .context("failed to load profiles")?,
    );
    let bus = EventBus::connect(config.redis_url.as_deref()).await;
    let chat = Arc::new(HttpChatClient::new().context("failed to build chat client")?);

    let state = AppState::new(store, registry, bus, Arc::clone(&config), chat);
    voxflow_server::serve(state).await.context("server failed")
}

async fn worker(config: Arc<Config>) -> Result<()> {
    let store = Arc::new(JobStore::open(&config.db_path()).context("failed to open job store")?);
    let registry = Arc::new(
        ProfileRegistry::open(config.profiles_dir(), config.prompts_dir())
            .context("failed to load profiles")?,
    );
    let bus = EventBus::connect(config.redis_url.as_deref()).await;

    let asr_key = std::env::var(voxflow_config::ASR_KEY_ENV).unwrap_or_default();
    if asr_key.is_empty() {
        warn!("{} not set, transcription will fail", voxflow_config::ASR_KEY_ENV);
    }
    let transcriber: Arc<dyn Transcribe> =
        Arc::new(WhisperTranscriber::new(asr_key).context("failed to build transcriber")?);

    let diarizer: Arc<dyn Diarize> =
        match std::env::var(voxflow_config::DIARIZATION_TOKEN_ENV).ok().filter(|v| !v.is_empty()) {
            Some(token) => match HelperDiarizer::new(token) {
                Ok(d) => Arc::new(d),
                Err(e) => {
                    warn!(error = %e, "diarizer unavailable, jobs fall back to a single speaker");
                    Arc::new(DisabledDiarizer)
                }
            },
            None => {
                warn!(
                    "{} not set, diarization disabled",
                    voxflow_config::DIARIZATION_TOKEN_ENV
                );
                Arc::new(DisabledDiarizer)
            }
        };

    let chat = Arc::new(HttpChatClient::new().context("failed to build chat client")?);

    let runner = JobRunner::new(
        store,
        registry,
        Arc::clone(&config),
        bus,
        transcriber,
        diarizer,
        chat,
    )
    .context("failed to build job runner")?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    info!("worker started");
    runner.run_loop(shutdown_rx).await;
    Ok(())
}

async fn check(config: &Config) -> Result<()> {
    println!("voxflow configuration check\n");

    println!("credentials:");
    println!("  ASR ({}): {}", voxflow_config::ASR_KEY_ENV, mark(voxflow_config::asr_configured()));
    for (name, configured) in voxflow_llm::configured_providers() {
        println!("  LLM {name}: {}", mark(configured));
    }
    println!(
        "  diarization ({}): {}",
        voxflow_config::DIARIZATION_TOKEN_ENV,
        mark(voxflow_config::diarization_configured())
    );

    println!("\ntools:");
    for (tool, version_flag) in [("ffmpeg", "-version"), ("ffprobe", "-version"), ("pandoc", "--version")] {
        println!("  {tool}: {}", mark(tool_available(tool, version_flag).await));
    }

    println!("\nservices:");
    match &config.redis_url {
        Some(url) => {
            let reachable = redis::Client::open(url.as_str())
                .and_then(|client| client.get_connection())
                .is_ok();
            println!("  redis ({url}): {}", mark(reachable));
        }
        None => println!("  redis: not configured (status events stay in-process)"),
    }

    println!("\ndirectories:");
    for (label, path) in [
        ("data", &config.data_dir),
        ("processing", &config.processing_dir),
        ("output", &config.output_dir),
        ("uploads", &config.uploads_dir),
        ("config", &config.config_dir),
    ] {
        println!("  {label}: {} {}", path.display(), mark(path.is_dir()));
    }

    let ready = voxflow_config::asr_configured() && voxflow_config::any_llm_configured();
    println!("\nready to process jobs: {}", mark(ready));
    Ok(())
}

async fn tool_available(name: &str, version_flag: &str) -> bool {
    tokio::process::Command::new(name)
        .arg(version_flag)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

fn mark(ok: bool) -> &'static str {
    if ok { "ok" } else { "missing" }
}
