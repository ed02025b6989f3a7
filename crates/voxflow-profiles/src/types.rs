use serde::{Deserialize, Serialize};

/// One step of a profile's pipeline, prompt body already loaded.
#[derive(Debug, Clone)]
pub struct Stage {
    /// Stage name; doubles as the `stage_id` in persisted rows.
    pub name: String,
    /// Prompt file path relative to the prompts root.
    pub prompt_file: String,
    /// Opaque template with `{transcript}` and optionally
    /// `{cleaned_transcript}` placeholders.
    pub prompt_template: String,
    pub system_message: String,
    pub model: String,
    /// Explicit provider routing hint.
    pub provider: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub requires_previous: bool,
    /// Whether this stage's text is also written as a final artifact.
    pub save_intermediate: bool,
    pub filename_suffix: String,
}

/// Destination routing for a profile's rich documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
    /// Canonical key; the loader also accepts the legacy `folder` spelling.
    pub share_folder: String,
    pub subfolder: String,
}

/// Notification channel settings carried by a profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NotificationConfig {
    pub ntfy_topic: Option<String>,
    pub ntfy_url: Option<String>,
    pub webhook_url: Option<String>,
    pub pushover_user: Option<String>,
    pub pushover_token: Option<String>,
    pub email_to: Option<String>,
    pub email_cc: Option<String>,
}

impl NotificationConfig {
    /// Whether any channel is configured at all.
    #[must_use]
    pub fn any_configured(&self) -> bool {
        self.ntfy_topic.is_some()
            || self.webhook_url.is_some()
            || (self.pushover_user.is_some() && self.pushover_token.is_some())
            || self.email_to.is_some()
    }
}

/// A named, ordered pipeline definition plus metadata.
#[derive(Debug, Clone)]
pub struct Profile {
    /// Filename stem of the definition; the stable lookup key.
    pub id: String,
    /// Display name, free-form.
    pub name: String,
    pub description: String,
    pub skip_diarization: bool,
    /// Propagates to submitted jobs; 1 = highest.
    pub priority: i64,
    pub stages: Vec<Stage>,
    pub routing: Option<RoutingConfig>,
    pub notifications: Option<NotificationConfig>,
}

/// Serde form of a stage inside a profile YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StageFile {
    pub name: String,
    pub prompt_file: String,
    #[serde(default)]
    pub system_message: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub provider: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub requires_previous: bool,
    #[serde(default = "default_true")]
    pub save_intermediate: bool,
    #[serde(default)]
    pub filename_suffix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RoutingFile {
    // `folder` is accepted on read; `share_folder` is what we write.
    #[serde(default, alias = "folder")]
    pub share_folder: String,
    #[serde(default)]
    pub subfolder: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct NotificationFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ntfy_topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ntfy_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pushover_user: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pushover_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_cc: Option<String>,
}

/// Serde form of a whole profile YAML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ProfileFile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub skip_diarization: bool,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default)]
    pub stages: Vec<StageFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingFile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notifications: Option<NotificationFile>,
}

/// Request shape for creating a profile through the registry.
#[derive(Debug, Clone, Deserialize)]
pub struct ProfileSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub skip_diarization: bool,
    #[serde(default = "default_priority")]
    pub priority: i64,
    pub stages: Vec<StageSpec>,
    #[serde(default)]
    pub routing_folder: Option<String>,
    #[serde(default)]
    pub routing_subfolder: Option<String>,
    #[serde(default)]
    pub notifications: Option<NotificationSpec>,
}

/// Request shape for one stage in `ProfileSpec`.
#[derive(Debug, Clone, Deserialize)]
pub struct StageSpec {
    pub name: String,
    /// Auto-derived under `<id>/` when omitted.
    #[serde(default)]
    pub prompt_file: Option<String>,
    pub prompt_content: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub requires_previous: bool,
    #[serde(default = "default_true")]
    pub save_intermediate: bool,
    #[serde(default)]
    pub filename_suffix: String,
}

/// Notification block of `ProfileSpec`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationSpec {
    #[serde(default)]
    pub ntfy_topic: Option<String>,
    #[serde(default)]
    pub ntfy_url: Option<String>,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub pushover_user: Option<String>,
    #[serde(default)]
    pub pushover_token: Option<String>,
    #[serde(default)]
    pub email_to: Option<String>,
    #[serde(default)]
    pub email_cc: Option<String>,
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

fn default_temperature() -> f32 {
    0.3
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout() -> u64 {
    120
}

fn default_priority() -> i64 {
    5
}

fn default_true() -> bool {
    true
}
