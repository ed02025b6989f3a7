//! Profile CRUD, prompt editing, folder mapping, and dry runs.

use std::collections::HashMap;
use std::time::Duration;

use axum::extract::{Path as UrlPath, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;

use voxflow_llm::{estimate_cost, resolve_provider, ChatBackend as _, ChatRequest};
use voxflow_profiles::{Profile, ProfileRegistry, ProfileSpec};
use voxflow_types::BUILTIN_NOTE_TYPES;

use crate::error::ApiError;
use crate::AppState;

/// Dry-run transcripts are previews; anything longer is truncated.
const DRY_RUN_MAX_CHARS: usize = 5000;

#[derive(Debug, Serialize)]
pub struct ProfileSummary {
    pub id: String,
    pub name: String,
    pub description: String,
    pub stage_count: usize,
    pub stages: Vec<String>,
    pub priority: i64,
    pub has_notifications: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routing_folder: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StageInfo {
    pub name: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub description: String,
}

#[derive(Debug, Serialize)]
pub struct ProfileDetail {
    pub id: String,
    pub name: String,
    pub description: String,
    pub skip_diarization: bool,
    pub priority: i64,
    pub stages: Vec<StageInfo>,
}

fn summary_of(profile: &Profile) -> ProfileSummary {
    ProfileSummary {
        id: profile.id.clone(),
        name: profile.name.clone(),
        description: profile.description.clone(),
        stage_count: profile.stages.len(),
        stages: profile.stages.iter().map(|s| s.name.clone()).collect(),
        priority: profile.priority,
        has_notifications: profile
            .notifications
            .as_ref()
            .map(|n| n.any_configured())
            .unwrap_or(false),
        routing_folder: profile.routing.as_ref().map(|r| r.share_folder.clone()),
    }
}

fn detail_of(profile: &Profile) -> ProfileDetail {
    ProfileDetail {
        id: profile.id.clone(),
        name: profile.name.clone(),
        description: profile.description.clone(),
        skip_diarization: profile.skip_diarization,
        priority: profile.priority,
        stages: profile
            .stages
            .iter()
            .enumerate()
            .map(|(i, s)| StageInfo {
                name: s.name.clone(),
                model: s.model.clone(),
                provider: s.provider.clone(),
                description: format!("Stage {}: {}", i + 1, s.name),
            })
            .collect(),
    }
}

fn builtin_detail(note_type: &str) -> ProfileDetail {
    let mut name = note_type.to_string();
    if let Some(first) = name.get_mut(0..1) {
        first.make_ascii_uppercase();
    }
    ProfileDetail {
        id: note_type.to_string(),
        name,
        description: format!("Standard {note_type} transcription with single-stage formatting"),
        skip_diarization: false,
        priority: 5,
        stages: vec![StageInfo {
            name: "format".into(),
            model: "deepseek-chat".into(),
            provider: None,
            description: "Format transcript into structured notes".into(),
        }],
    }
}

/// `GET /api/profiles` — loaded profiles plus built-in note types.
pub async fn list_profiles(State(state): State<AppState>) -> Json<Vec<ProfileSummary>> {
    let loaded = state.registry.all();
    let mut profiles: Vec<ProfileSummary> = loaded.values().map(|p| summary_of(p)).collect();
    profiles.sort_by(|a, b| a.id.cmp(&b.id));

    for note_type in BUILTIN_NOTE_TYPES {
        if loaded.contains_key(*note_type) {
            continue;
        }
        let detail = builtin_detail(note_type);
        profiles.push(ProfileSummary {
            id: detail.id,
            name: detail.name,
            description: detail.description,
            stage_count: 1,
            stages: vec!["format".into()],
            priority: 5,
            has_notifications: false,
            routing_folder: None,
        });
    }
    Json(profiles)
}

/// `POST /api/profiles` — create a profile with its prompt files.
pub async fn create_profile(
    State(state): State<AppState>,
    Json(spec): Json<ProfileSpec>,
) -> Result<(StatusCode, Json<ProfileDetail>), ApiError> {
    let profile = state.registry.create_profile(&spec)?;
    Ok((StatusCode::CREATED, Json(detail_of(&profile))))
}

/// `GET /api/profiles/{id}`.
pub async fn get_profile(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<ProfileDetail>, ApiError> {
    if let Some(profile) = state.registry.get(&id) {
        return Ok(Json(detail_of(&profile)));
    }
    if ProfileRegistry::is_builtin(&id) {
        return Ok(Json(builtin_detail(&id)));
    }
    Err(ApiError::not_found(format!("Profile {id} not found")))
}

/// `DELETE /api/profiles/{id}`.
pub async fn delete_profile(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.delete_profile(&id)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/profiles/folder-map`.
pub async fn get_folder_map(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "folder_map": state.registry.folder_map() }))
}

#[derive(Debug, Deserialize)]
pub struct FolderMappingBody {
    pub profile_id: String,
}

/// `PUT /api/profiles/folder-map/{folder}`.
pub async fn set_folder_mapping(
    State(state): State<AppState>,
    UrlPath(folder): UrlPath<String>,
    Json(body): Json<FolderMappingBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if body.profile_id.is_empty() {
        return Err(ApiError::bad_request("profile_id is required"));
    }
    state.registry.set_folder_mapping(&folder, &body.profile_id)?;
    Ok(Json(json!({ "folder": folder, "profile_id": body.profile_id })))
}

/// `DELETE /api/profiles/folder-map/{folder}`.
pub async fn delete_folder_mapping(
    State(state): State<AppState>,
    UrlPath(folder): UrlPath<String>,
) -> Result<StatusCode, ApiError> {
    state.registry.remove_folder_mapping(&folder)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/profiles/{id}/prompts/{stage_index}`.
pub async fn get_stage_prompt(
    State(state): State<AppState>,
    UrlPath((id, stage_index)): UrlPath<(String, usize)>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let (prompt, filename) = state.registry.stage_prompt(&id, stage_index)?;
    Ok(Json(json!({ "prompt": prompt, "filename": filename })))
}

#[derive(Debug, Deserialize)]
pub struct PromptBody {
    #[serde(default)]
    pub prompt: String,
}

/// `PUT /api/profiles/{id}/prompts/{stage_index}`.
pub async fn update_stage_prompt(
    State(state): State<AppState>,
    UrlPath((id, stage_index)): UrlPath<(String, usize)>,
    Json(body): Json<PromptBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let filename = state
        .registry
        .update_stage_prompt(&id, stage_index, &body.prompt)?;
    Ok(Json(json!({ "saved": true, "filename": filename })))
}

#[derive(Debug, Deserialize)]
pub struct DryRunBody {
    #[serde(default)]
    pub stage_index: usize,
    #[serde(default)]
    pub transcript: Option<String>,
    #[serde(default)]
    pub job_id: Option<String>,
    #[serde(default)]
    pub max_chars: Option<usize>,
}

/// `POST /api/profiles/{id}/dry-run` — run one stage against sample text
/// without creating a job. Input is truncated regardless of source.
pub async fn dry_run(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
    Json(body): Json<DryRunBody>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let profile = state
        .registry
        .get(&id)
        .ok_or_else(|| ApiError::not_found(format!("Profile {id} not found")))?;
    let stage = profile.stages.get(body.stage_index).ok_or_else(|| {
        ApiError::bad_request(format!(
            "Invalid stage_index. Profile has {} stages.",
            profile.stages.len()
        ))
    })?;

    let mut transcript = match (&body.transcript, &body.job_id) {
        (Some(text), _) if !text.is_empty() => text.clone(),
        (_, Some(job_id)) => {
            let path = state
                .config
                .job_data_dir(job_id)
                .join("transcription.json");
            let raw = std::fs::read_to_string(&path).map_err(|_| {
                ApiError::bad_request(format!("Could not load transcript from job {job_id}"))
            })?;
            serde_json::from_str::<voxflow_types::Transcription>(&raw)
                .map(|t| t.text)
                .map_err(|e| ApiError::internal(format!("cached transcription unreadable: {e}")))?
        }
        _ => return Err(ApiError::bad_request("Provide 'transcript' or 'job_id'")),
    };

    let max_chars = body.max_chars.unwrap_or(DRY_RUN_MAX_CHARS);
    if transcript.chars().count() > max_chars {
        transcript = transcript.chars().take(max_chars).collect::<String>()
            + "\n\n[... truncated for dry-run ...]";
    }

    let provider = resolve_provider(&stage.model, stage.provider.as_deref())
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let mut prompt = stage.prompt_template.replace("{transcript}", &transcript);
    if stage.prompt_template.contains("{cleaned_transcript}") {
        prompt = prompt.replace("{cleaned_transcript}", &transcript);
    }

    let outcome = state
        .chat
        .complete(ChatRequest {
            model: stage.model.clone(),
            provider_hint: stage.provider.clone(),
            system_message: stage.system_message.clone(),
            prompt,
            temperature: stage.temperature,
            max_tokens: stage.max_tokens,
            timeout: Duration::from_secs(stage.timeout_secs),
        })
        .await
        .map_err(|e| ApiError::internal(format!("Dry-run failed: {e}")))?;

    let cost = estimate_cost(&stage.model, outcome.input_tokens, outcome.output_tokens);
    let response: HashMap<&str, serde_json::Value> = HashMap::from([
        ("stage", json!(stage.name)),
        ("model", json!(stage.model)),
        ("provider", json!(provider.name)),
        ("output", json!(outcome.content)),
        ("input_tokens", json!(outcome.input_tokens)),
        ("output_tokens", json!(outcome.output_tokens)),
        ("cost", json!((cost * 1e6).round() / 1e6)),
        ("input_length", json!(transcript.chars().count())),
        ("output_length", json!(outcome.content.chars().count())),
    ]);
    Ok(Json(json!(response)))
}
