//! Route handlers.

use axum::extract::{Query, State};
use axum::response::Redirect;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Plain `{"message": ...}` body.
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

/// Query parameters of the OAuth2 redirect.
///
/// All optional so a malformed redirect gets a JSON 400 rather than the
/// extractor's plain-text rejection.
#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Body of `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub authorized: bool,
    pub file_id: Option<String>,
    pub last_backup_at: Option<DateTime<Utc>>,
    pub last_size_bytes: Option<u64>,
    pub backups_completed: u64,
}

/// GET /backup
///
/// Uploads the archive, creating the remote object on first use and
/// updating it afterwards. The run happens on its own task, so a caller
/// hanging up does not abort an upload that already started.
pub async fn backup(State(state): State<AppState>) -> Result<Json<MessageResponse>, ApiError> {
    let remote = state
        .auth
        .remote()
        .await
        .map_err(|_| ApiError::AuthorizationPending)?;

    let engine = state.engine.clone();
    let shutdown = state.shutdown.clone();
    let result = tokio::spawn(async move { engine.run(remote.as_ref(), &shutdown).await })
        .await
        .map_err(|e| ApiError::Internal(format!("Backup task failed: {}", e)))?;

    match result {
        Ok(_) => Ok(MessageResponse::new("pong")),
        Err(e) => {
            error!("File backup failed: {}", e);
            Err(ApiError::Backup(e))
        }
    }
}

/// GET /callback?code=..&state=..
pub async fn callback(
    State(state): State<AppState>,
    Query(query): Query<CallbackQuery>,
) -> Result<Json<MessageResponse>, ApiError> {
    if let Some(provider_error) = query.error {
        warn!("Authorization denied by provider: {}", provider_error);
        return Err(ApiError::InvalidCallback(format!(
            "Provider returned error: {}",
            provider_error
        )));
    }

    let (Some(code), Some(csrf_state)) = (query.code, query.state) else {
        return Err(ApiError::InvalidCallback(
            "Missing code or state parameter".to_string(),
        ));
    };

    state
        .auth
        .complete(&code, &csrf_state)
        .await
        .map_err(ApiError::from_callback)?;

    Ok(MessageResponse::new("Authorization complete"))
}

/// GET /authorize
///
/// Sends the operator to the provider's consent page.
pub async fn authorize(State(state): State<AppState>) -> Result<Redirect, ApiError> {
    match state.auth.authorization_url().await {
        Some(url) => {
            info!("Redirecting to authorization URL");
            Ok(Redirect::temporary(&url))
        }
        None => Err(ApiError::AlreadyAuthorized),
    }
}

/// GET /status
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let backup = state.engine.state().await;

    Json(StatusResponse {
        authorized: state.auth.is_authorized().await,
        file_id: backup.file_id,
        last_backup_at: backup.last_backup_at,
        last_size_bytes: backup.last_size_bytes,
        backups_completed: backup.backups_completed,
    })
}

/// GET /health
pub async fn health() -> &'static str {
    "OK"
}
