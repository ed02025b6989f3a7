use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use voxflow_profiles::ProfileError;
use voxflow_store::StoreError;

/// API-facing error carrying a status code and a client-safe message.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    #[must_use]
    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    #[must_use]
    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    #[must_use]
    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match &e {
            StoreError::NotFound { .. } => Self::not_found(e.to_string()),
            StoreError::Conflict { .. } | StoreError::AlreadyTerminal { .. } => {
                Self::new(StatusCode::CONFLICT, e.to_string())
            }
            StoreError::Corrupt(_) | StoreError::Sqlite(_) => Self::internal(e.to_string()),
        }
    }
}

impl From<ProfileError> for ApiError {
    fn from(e: ProfileError) -> Self {
        match &e {
            ProfileError::NotFound { .. } | ProfileError::StageOutOfRange { .. } => {
                Self::not_found(e.to_string())
            }
            ProfileError::Conflict { .. } => Self::new(StatusCode::CONFLICT, e.to_string()),
            ProfileError::InvalidId { .. }
            | ProfileError::BuiltIn { .. }
            | ProfileError::UnsafePromptPath { .. } => Self::bad_request(e.to_string()),
            ProfileError::Parse { .. } | ProfileError::Serialize(_) | ProfileError::Io { .. } => {
                Self::internal(e.to_string())
            }
        }
    }
}
