//! Environment-driven configuration
//!
//! The service is configured entirely through environment variables with
//! defaulted filesystem roots. A `Config` is resolved once at process start
//! and passed by reference to the server and worker; nothing re-reads the
//! environment for paths after that point. Provider credentials are the one
//! exception: they are read at use time by the routing layer so that a key
//! added to the environment of a restarted worker takes effect without a
//! config migration.

use std::env;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Environment variable carrying the ASR (whisper endpoint) credential.
pub const ASR_KEY_ENV: &str = "GROQ_API_KEY";
/// Environment variable carrying the diarization model-hub token.
pub const DIARIZATION_TOKEN_ENV: &str = "HUGGINGFACE_TOKEN";
/// Environment variables for the LLM providers, any one of which makes the
/// service ready to run LLM stages.
pub const LLM_KEY_ENVS: &[&str] = &[
    "DEEPSEEK_API_KEY",
    "OPENROUTER_API_KEY",
    "OPENAI_API_KEY",
    "ZAI_API_KEY",
];
/// Optional admin credential for the HTTP API; auth is disabled when unset.
pub const ADMIN_KEY_ENV: &str = "PIPELINE_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Root for the job database (`<data>/jobs.db`).
    pub data_dir: PathBuf,
    /// Root of the working zones and per-job artifacts.
    pub processing_dir: PathBuf,
    /// Root for final text and rich-document outputs.
    pub output_dir: PathBuf,
    /// Root for uploaded source files, one subdirectory per profile.
    pub uploads_dir: PathBuf,
    /// Root holding `profiles/` and `prompts/`.
    pub config_dir: PathBuf,
    /// Redis endpoint for status fan-out; publishing is skipped when unset.
    pub redis_url: Option<String>,
    /// Bind address for the HTTP API.
    pub bind_addr: String,
    /// Worker poll interval when the queue is empty, in seconds.
    pub poll_interval_secs: u64,
}

impl Config {
    /// Resolve configuration from the environment, defaulting every path
    /// under the current working directory.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            data_dir: env_path("VOXFLOW_DATA_DIR", "data"),
            processing_dir: env_path("VOXFLOW_PROCESSING_DIR", "processing"),
            output_dir: env_path("VOXFLOW_OUTPUT_DIR", "output"),
            uploads_dir: env_path("VOXFLOW_UPLOADS_DIR", "uploads"),
            config_dir: env_path("VOXFLOW_CONFIG_DIR", "config"),
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.is_empty()),
            bind_addr: env::var("VOXFLOW_BIND")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "0.0.0.0:8000".to_string()),
            poll_interval_secs: env::var("VOXFLOW_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
        }
    }

    /// Path to the sqlite job database.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("jobs.db")
    }

    /// Working zone the source file is moved to on first processing attempt.
    #[must_use]
    pub fn quarantine_dir(&self) -> PathBuf {
        self.processing_dir.join("quarantine")
    }

    /// Destination for source files of completed jobs.
    #[must_use]
    pub fn archive_dir(&self) -> PathBuf {
        self.processing_dir.join("archive")
    }

    /// Destination for source files of failed jobs.
    #[must_use]
    pub fn errors_dir(&self) -> PathBuf {
        self.processing_dir.join("errors")
    }

    /// Per-job directory holding resumable stage artifacts.
    #[must_use]
    pub fn job_data_dir(&self, job_id: &str) -> PathBuf {
        self.processing_dir.join("job_data").join(job_id)
    }

    /// Profile definition directory.
    #[must_use]
    pub fn profiles_dir(&self) -> PathBuf {
        self.config_dir.join("profiles")
    }

    /// Prompt body directory.
    #[must_use]
    pub fn prompts_dir(&self) -> PathBuf {
        self.config_dir.join("prompts")
    }

    /// Create every directory the pipeline writes into.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::CreateDir` naming the first path that could not
    /// be created.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        let dirs = [
            self.data_dir.clone(),
            self.uploads_dir.clone(),
            self.output_dir.clone(),
            self.processing_dir.clone(),
            self.quarantine_dir(),
            self.archive_dir(),
            self.errors_dir(),
            self.processing_dir.join("job_data"),
            self.profiles_dir(),
            self.prompts_dir(),
        ];
        for dir in dirs {
            create_dir(&dir)?;
        }
        Ok(())
    }
}

fn create_dir(path: &Path) -> Result<(), ConfigError> {
    std::fs::create_dir_all(path).map_err(|source| ConfigError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

fn env_path(var: &str, default: &str) -> PathBuf {
    env::var(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map_or_else(|| PathBuf::from(default), PathBuf::from)
}

/// Whether the ASR credential is configured.
#[must_use]
pub fn asr_configured() -> bool {
    env_present(ASR_KEY_ENV)
}

/// Whether at least one LLM provider credential is configured.
#[must_use]
pub fn any_llm_configured() -> bool {
    LLM_KEY_ENVS.iter().any(|key| env_present(key))
}

/// Whether the diarization model token is configured.
#[must_use]
pub fn diarization_configured() -> bool {
    env_present(DIARIZATION_TOKEN_ENV)
}

fn env_present(var: &str) -> bool {
    env::var(var).map(|v| !v.is_empty()).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derived_paths_hang_off_roots() {
        let config = Config {
            data_dir: PathBuf::from("/srv/data"),
            processing_dir: PathBuf::from("/srv/processing"),
            output_dir: PathBuf::from("/srv/output"),
            uploads_dir: PathBuf::from("/srv/uploads"),
            config_dir: PathBuf::from("/srv/config"),
            redis_url: None,
            bind_addr: "127.0.0.1:8000".into(),
            poll_interval_secs: 5,
        };
        assert_eq!(config.db_path(), PathBuf::from("/srv/data/jobs.db"));
        assert_eq!(
            config.job_data_dir("abc"),
            PathBuf::from("/srv/processing/job_data/abc")
        );
        assert_eq!(
            config.quarantine_dir(),
            PathBuf::from("/srv/processing/quarantine")
        );
        assert_eq!(config.prompts_dir(), PathBuf::from("/srv/config/prompts"));
    }

    #[test]
    fn ensure_directories_creates_all_zones() {
        let root = tempfile::tempdir().unwrap();
        let base = root.path();
        let config = Config {
            data_dir: base.join("data"),
            processing_dir: base.join("processing"),
            output_dir: base.join("output"),
            uploads_dir: base.join("uploads"),
            config_dir: base.join("config"),
            redis_url: None,
            bind_addr: "127.0.0.1:8000".into(),
            poll_interval_secs: 5,
        };
        config.ensure_directories().unwrap();
        assert!(config.quarantine_dir().is_dir());
        assert!(config.archive_dir().is_dir());
        assert!(config.errors_dir().is_dir());
        assert!(config.profiles_dir().is_dir());
        assert!(config.prompts_dir().is_dir());
    }
}
