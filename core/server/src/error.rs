//! HTTP error responses.
//!
//! Handlers return `ApiError`, which maps each failure to a status code and
//! a JSON body of the form `{"message": ..., "error": ...}`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

use driveback_common::Error;

/// Errors surfaced to HTTP callers.
#[derive(Debug, Error)]
pub enum ApiError {
    /// OAuth2 authorization has not completed yet (503)
    #[error("Authorization pending")]
    AuthorizationPending,

    /// The backup run failed (504 on timeout, 500 otherwise)
    #[error("File backup failed: {0}")]
    Backup(Error),

    /// Malformed or forged authorization callback (400)
    #[error("Invalid authorization callback: {0}")]
    InvalidCallback(String),

    /// Authorization already completed (409)
    #[error("Already authorized")]
    AlreadyAuthorized,

    /// The provider rejected the authorization code (502)
    #[error("Authorization failed: {0}")]
    AuthorizationFailed(String),

    /// Unexpected server-side failure (500)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Classify a failure from completing authorization.
    pub fn from_callback(err: Error) -> Self {
        match err {
            Error::InvalidInput(msg) => ApiError::InvalidCallback(msg),
            Error::AlreadyExists(_) => ApiError::AlreadyAuthorized,
            other => ApiError::AuthorizationFailed(other.to_string()),
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::AuthorizationPending => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Backup(Error::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Backup(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::InvalidCallback(_) => StatusCode::BAD_REQUEST,
            ApiError::AlreadyAuthorized => StatusCode::CONFLICT,
            ApiError::AuthorizationFailed(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = match &self {
            ApiError::AuthorizationPending => serde_json::json!({
                "message": "Authorization pending",
            }),
            ApiError::AlreadyAuthorized => serde_json::json!({
                "message": "Already authorized",
            }),
            ApiError::Backup(err) => serde_json::json!({
                "message": "File backup failed",
                "error": err.to_string(),
            }),
            ApiError::InvalidCallback(msg) => serde_json::json!({
                "message": "Invalid authorization callback",
                "error": msg,
            }),
            ApiError::AuthorizationFailed(msg) => serde_json::json!({
                "message": "Authorization failed",
                "error": msg,
            }),
            ApiError::Internal(msg) => serde_json::json!({
                "message": "Internal server error",
                "error": msg,
            }),
        };

        (self.status(), Json(body)).into_response()
    }
}
