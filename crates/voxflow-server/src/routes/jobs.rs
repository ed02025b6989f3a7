//! Job submission, inspection, listing, and removal.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use axum::extract::{ConnectInfo, Multipart, Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use voxflow_store::{JobFilter, StoreError};
use voxflow_types::{Job, JobEvent, JobStatus, StageResult};

use crate::error::ApiError;
use crate::upload::save_upload;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct JobResponse {
    #[serde(flatten)]
    pub job: Job,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stage_results: Vec<StageResult>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<OutputEntry>,
}

#[derive(Debug, Serialize)]
pub struct OutputEntry {
    pub path: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub stage: String,
    pub size_bytes: u64,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub profile_id: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct JobListResponse {
    pub jobs: Vec<JobResponse>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

/// `POST /api/jobs` — multipart upload creating one QUEUED job.
pub async fn create_job(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<JobResponse>), ApiError> {
    if !state.job_limiter.check(&addr.ip().to_string()) {
        return Err(ApiError::new(
            StatusCode::TOO_MANY_REQUESTS,
            "rate limit exceeded, retry shortly",
        ));
    }

    let mut profile_id: Option<String> = None;
    let mut saved_path: Option<PathBuf> = None;

    // profile_id may arrive before or after the file part; the upload is
    // re-homed under the right profile directory afterwards if needed.
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("profile_id") => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::bad_request(format!("bad profile_id field: {e}")))?;
                profile_id = Some(value);
            }
            Some("file") => {
                let target_profile = profile_id.as_deref().unwrap_or("pending");
                saved_path =
                    Some(save_upload(field, &state.config.uploads_dir, target_profile).await?);
            }
            _ => {}
        }
    }

    let profile_id =
        profile_id.ok_or_else(|| ApiError::bad_request("profile_id field is required"))?;
    let source_path =
        saved_path.ok_or_else(|| ApiError::bad_request("file field is required"))?;

    if !state.registry.accepts(&profile_id) {
        // Reject before it ever enters the queue; remove the stray upload.
        let _ = tokio::fs::remove_file(&source_path).await;
        return Err(ApiError::bad_request(format!(
            "Invalid profile_id: {profile_id}"
        )));
    }

    let priority = state
        .registry
        .get(&profile_id)
        .map(|p| p.priority)
        .unwrap_or(5);

    let job = Job::queued(
        Uuid::new_v4().to_string(),
        &profile_id,
        source_path.to_string_lossy().into_owned(),
        priority,
    );
    state.store.enqueue(&job)?;
    state.bus.publish(JobEvent::from_job(&job)).await;
    info!(job_id = %job.id, profile_id, "job queued");

    Ok((
        StatusCode::CREATED,
        Json(JobResponse {
            job,
            stage_results: Vec::new(),
            outputs: Vec::new(),
        }),
    ))
}

/// `GET /api/jobs/{id}` — the job plus its materialized outputs when done.
pub async fn get_job(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<JobResponse>, ApiError> {
    let job = state
        .store
        .get_job(&id)?
        .ok_or_else(|| ApiError::not_found(format!("Job {id} not found")))?;

    let stage_results = state.store.stage_results(&id)?;
    let outputs = if job.status == JobStatus::Complete {
        final_outputs(&state, &job)
    } else {
        Vec::new()
    };

    Ok(Json(JobResponse {
        job,
        stage_results,
        outputs,
    }))
}

/// `GET /api/jobs/{id}/outputs` — intermediate artifacts plus final files.
pub async fn get_job_outputs(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let job = state
        .store
        .get_job(&id)?
        .ok_or_else(|| ApiError::not_found(format!("Job {id} not found")))?;

    let mut files: Vec<OutputEntry> = Vec::new();
    for row in state.store.stage_results(&id)? {
        let Some(path) = row.output_path.as_deref() else {
            continue;
        };
        let path = Path::new(path);
        let Ok(meta) = std::fs::metadata(path) else {
            continue;
        };
        files.push(OutputEntry {
            path: path.to_string_lossy().into_owned(),
            name: file_name(path),
            kind: "intermediate".into(),
            stage: row.stage_id.clone(),
            size_bytes: meta.len(),
        });
    }
    files.extend(final_outputs(&state, &job));

    Ok(Json(serde_json::json!({
        "job_id": id,
        "profile_id": job.profile_id,
        "files": files,
        "total_files": files.len(),
    })))
}

/// `GET /api/jobs` — paginated listing, newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<JobListResponse>, ApiError> {
    let status = match query.status.as_deref() {
        Some(s) => Some(
            JobStatus::parse(s)
                .ok_or_else(|| ApiError::bad_request(format!("unknown status '{s}'")))?,
        ),
        None => None,
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 100);
    let offset = query.offset.unwrap_or(0).max(0);

    let page = state.store.list_jobs(&JobFilter {
        status,
        profile_id: query.profile_id.clone(),
        limit,
        offset,
    })?;

    let mut jobs = Vec::with_capacity(page.jobs.len());
    for job in page.jobs {
        let stage_results = state.store.stage_results(&job.id)?;
        jobs.push(JobResponse {
            job,
            stage_results,
            outputs: Vec::new(),
        });
    }

    Ok(Json(JobListResponse {
        jobs,
        total: page.total,
        limit,
        offset,
    }))
}

/// `DELETE /api/jobs/{id}` — cancel an active job; delete a terminal one.
pub async fn delete_job(
    State(state): State<AppState>,
    UrlPath(id): UrlPath<String>,
) -> Result<StatusCode, ApiError> {
    match state.store.cancel(&id) {
        Ok(previous) => {
            info!(job_id = %id, %previous, "job cancelled");
            if let Ok(Some(job)) = state.store.get_job(&id) {
                state.bus.publish(JobEvent::from_job(&job)).await;
            }
            Ok(StatusCode::NO_CONTENT)
        }
        Err(StoreError::AlreadyTerminal { .. }) => {
            state.store.delete_job(&id)?;
            info!(job_id = %id, "job deleted");
            Ok(StatusCode::NO_CONTENT)
        }
        Err(e) => Err(e.into()),
    }
}

/// Scan the output tree for files matching the job's source stem.
fn final_outputs(state: &AppState, job: &Job) -> Vec<OutputEntry> {
    let stem = Path::new(&job.source_path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    // Upload names carry a timestamp prefix the output writer strips.
    let clean_stem = stem
        .splitn(2, '_')
        .nth(1)
        .unwrap_or(&stem)
        .replace([' '], "_");
    if clean_stem.is_empty() {
        return Vec::new();
    }

    let mut entries = Vec::new();
    collect_matching(&state.config.output_dir, &clean_stem, &mut entries);
    entries
}

fn collect_matching(dir: &Path, needle: &str, out: &mut Vec<OutputEntry>) {
    let Ok(read_dir) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in read_dir.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_matching(&path, needle, out);
        } else if file_name(&path).contains(needle) {
            let Ok(meta) = entry.metadata() else { continue };
            out.push(OutputEntry {
                path: path.to_string_lossy().into_owned(),
                name: file_name(&path),
                kind: path
                    .extension()
                    .map(|e| e.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                stage: "final".into(),
                size_bytes: meta.len(),
            });
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
