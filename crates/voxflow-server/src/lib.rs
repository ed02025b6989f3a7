//! HTTP intake API
//!
//! A thin layer over the engine: job submission and inspection, profile
//! CRUD, a dry-run endpoint, the SSE event stream, and liveness/readiness.
//! All domain state lives in the store and the registry; handlers validate,
//! delegate, and map errors to status codes.

mod error;
mod ratelimit;
mod routes;
mod upload;

use std::net::SocketAddr;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

use voxflow_config::Config;
use voxflow_engine::EventBus;
use voxflow_llm::ChatBackend;
use voxflow_profiles::ProfileRegistry;
use voxflow_store::JobStore;

pub use error::ApiError;
pub use ratelimit::RateLimiter;

/// Hard cap on uploaded media size.
pub const MAX_UPLOAD_BYTES: u64 = 500 * 1024 * 1024;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
    pub registry: Arc<ProfileRegistry>,
    pub bus: EventBus,
    pub config: Arc<Config>,
    pub chat: Arc<dyn ChatBackend>,
    pub job_limiter: Arc<RateLimiter>,
    pub admin_key: Option<String>,
    pub stream_subscribers: Arc<AtomicUsize>,
}

impl AppState {
    /// Assemble the state, reading the optional admin key from the
    /// environment.
    #[must_use]
    pub fn new(
        store: Arc<JobStore>,
        registry: Arc<ProfileRegistry>,
        bus: EventBus,
        config: Arc<Config>,
        chat: Arc<dyn ChatBackend>,
    ) -> Self {
        Self {
            store,
            registry,
            bus,
            config,
            chat,
            job_limiter: Arc::new(RateLimiter::per_minute(10)),
            admin_key: std::env::var(voxflow_config::ADMIN_KEY_ENV)
                .ok()
                .filter(|v| !v.is_empty()),
            stream_subscribers: Arc::new(AtomicUsize::new(0)),
        }
    }
}

/// Build the full API router.
#[must_use]
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/jobs", post(routes::jobs::create_job).get(routes::jobs::list_jobs))
        .route(
            "/jobs/{id}",
            get(routes::jobs::get_job).delete(routes::jobs::delete_job),
        )
        .route("/jobs/{id}/outputs", get(routes::jobs::get_job_outputs))
        .route(
            "/profiles",
            get(routes::profiles::list_profiles).post(routes::profiles::create_profile),
        )
        .route(
            "/profiles/folder-map",
            get(routes::profiles::get_folder_map),
        )
        .route(
            "/profiles/folder-map/{folder}",
            put(routes::profiles::set_folder_mapping)
                .delete(routes::profiles::delete_folder_mapping),
        )
        .route(
            "/profiles/{id}",
            get(routes::profiles::get_profile).delete(routes::profiles::delete_profile),
        )
        .route(
            "/profiles/{id}/prompts/{stage_index}",
            get(routes::profiles::get_stage_prompt).put(routes::profiles::update_stage_prompt),
        )
        .route("/profiles/{id}/dry-run", post(routes::profiles::dry_run))
        .route("/logs/stream", get(routes::stream::stream_events))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    Router::new()
        .nest("/api", api)
        .route("/health", get(routes::health::health))
        .route("/ready", get(routes::health::ready))
        // Leave room for multipart framing around the media cap.
        .layer(DefaultBodyLimit::max((MAX_UPLOAD_BYTES + 1024 * 1024) as usize))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until the process exits.
///
/// # Errors
///
/// Returns the bind or serve error.
pub async fn serve(state: AppState) -> std::io::Result<()> {
    let addr = state.config.bind_addr.clone();
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "API listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

/// When `PIPELINE_API_KEY` is set, every `/api` request must carry it in
/// `X-API-Key`; with no key configured, auth is disabled.
async fn require_api_key(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if let Some(expected) = &state.admin_key {
        let provided = request
            .headers()
            .get("x-api-key")
            .and_then(|v| v.to_str().ok());
        if provided != Some(expected.as_str()) {
            return Err(StatusCode::FORBIDDEN);
        }
    }
    Ok(next.run(request).await)
}
