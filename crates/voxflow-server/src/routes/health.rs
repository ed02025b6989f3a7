//! Liveness and readiness probes.

use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde_json::json;

/// `GET /health` — process liveness.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

/// `GET /ready` — readiness requires the ASR credential and at least one
/// LLM provider credential.
pub async fn ready() -> (StatusCode, Json<serde_json::Value>) {
    let asr = voxflow_config::asr_configured();
    let llm = voxflow_config::any_llm_configured();
    let providers: Vec<serde_json::Value> = voxflow_llm::configured_providers()
        .into_iter()
        .map(|(name, configured)| json!({ "name": name, "configured": configured }))
        .collect();

    let ready = asr && llm;
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(json!({
            "ready": ready,
            "asr_configured": asr,
            "llm_configured": llm,
            "providers": providers,
            "diarization_configured": voxflow_config::diarization_configured(),
            "timestamp": Utc::now().to_rfc3339(),
        })),
    )
}
