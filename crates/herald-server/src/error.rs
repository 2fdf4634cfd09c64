use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use herald_proto::TransportError;
use herald_session::SessionError;
use herald_store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("WhatsApp session is not ready")]
    NotReady,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    Invalid(String),

    #[error("Temporary failure: {0}")]
    Transient(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Search is unavailable: this build has no FTS5 index")]
    SearchUnavailable,

    #[error("Unauthorized: invalid or missing API key")]
    Unauthorized,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Invalid(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::NotReady
            | ApiError::Transient(_)
            | ApiError::SearchUnavailable
            | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => ApiError::NotFound("record not found".to_string()),
            StoreError::SearchUnavailable => ApiError::SearchUnavailable,
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotConnected => ApiError::NotReady,
            TransportError::Timeout => ApiError::Transient("request timed out".to_string()),
            TransportError::Protocol(msg) => ApiError::Transient(msg),
            TransportError::SessionStore(msg) => ApiError::Internal(msg),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            SessionError::Store(e) => e.into(),
            SessionError::Transport(e) => e.into(),
            SessionError::DeepSyncRunning => {
                ApiError::Conflict("deep sync already in progress".to_string())
            }
            SessionError::Timeout => ApiError::Transient("request timed out".to_string()),
        }
    }
}
