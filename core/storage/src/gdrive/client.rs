//! Google Drive API client.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::{header, Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use driveback_common::{Error, Result};

use super::auth::TokenManager;
use crate::provider::{ObjectSpec, ProgressFn, RemoteFile, UploadSource};

/// Google Drive upload API base URL.
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// Chunk size for resumable uploads (must be a multiple of 256KB).
const CHUNK_SIZE: usize = 8 * 256 * 1024; // 2MB

/// How many times one upload may resume after a transport failure.
const MAX_RESUMES: u32 = 3;

/// Fields requested for every file resource.
const FILE_FIELDS: &str = "id,name,mimeType,size,modifiedTime";

/// Google Drive file metadata from API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    /// File ID.
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    /// File size in bytes; Drive encodes int64 as a string.
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub modified_time: Option<DateTime<Utc>>,
}

impl DriveFile {
    /// Get size as u64.
    pub fn size_bytes(&self) -> Option<u64> {
        self.size.as_ref().and_then(|s| s.parse().ok())
    }
}

impl From<DriveFile> for RemoteFile {
    fn from(file: DriveFile) -> Self {
        let size = file.size_bytes();
        Self {
            id: file.id,
            name: file.name,
            mime_type: file.mime_type,
            size,
            modified: file.modified_time,
        }
    }
}

/// Outcome of sending one chunk or querying an upload session.
#[derive(Debug)]
pub enum UploadStatus {
    /// The provider has the whole file.
    Complete(DriveFile),
    /// The provider acknowledged bytes `0..next_offset`.
    Incomplete { next_offset: u64 },
}

/// Parse the `Range` header of a 308 response into the next byte offset.
///
/// Drive reports the persisted range as `bytes=0-N`; a missing header means
/// nothing has been persisted yet.
pub fn next_offset_from_range(range: Option<&str>) -> Option<u64> {
    let Some(range) = range else {
        return Some(0);
    };

    let last = range.trim().strip_prefix("bytes=")?.split_once('-')?.1;
    last.parse::<u64>().ok().map(|n| n + 1)
}

/// Google Drive API client.
pub struct DriveClient {
    http: Client,
    token_manager: Arc<TokenManager>,
}

impl DriveClient {
    /// Create a new Drive client.
    pub fn new(token_manager: Arc<TokenManager>) -> Result<Self> {
        // 308 is "resume incomplete" for upload sessions, not a redirect.
        let http = Client::builder()
            .user_agent(concat!("driveback/", env!("CARGO_PKG_VERSION")))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            token_manager,
        })
    }

    /// Get authorization header.
    async fn auth_header(&self) -> Result<String> {
        let token = self.token_manager.get_access_token().await?;
        Ok(format!("Bearer {}", token))
    }

    /// Start a resumable upload session that creates a new file.
    ///
    /// Returns the session URI.
    pub async fn start_resumable_create(
        &self,
        spec: &ObjectSpec,
        total_size: u64,
    ) -> Result<String> {
        let url = format!("{}/files", DRIVE_UPLOAD_BASE);
        let auth = self.auth_header().await?;

        let mut metadata = serde_json::json!({
            "name": spec.name,
            "mimeType": spec.mime_type,
        });
        if let Some(parent) = &spec.parent_id {
            metadata["parents"] = serde_json::json!([parent]);
        }

        let response = self
            .http
            .post(&url)
            .header(header::AUTHORIZATION, auth)
            .header("X-Upload-Content-Type", spec.mime_type.as_str())
            .header("X-Upload-Content-Length", total_size.to_string())
            .query(&[("uploadType", "resumable"), ("fields", FILE_FIELDS)])
            .json(&metadata)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to start resumable upload: {}", e)))?;

        session_uri(response).await
    }

    /// Start a resumable upload session that replaces the content of
    /// `file_id`.
    pub async fn start_resumable_update(
        &self,
        file_id: &str,
        spec: &ObjectSpec,
        total_size: u64,
    ) -> Result<String> {
        let url = format!("{}/files/{}", DRIVE_UPLOAD_BASE, file_id);
        let auth = self.auth_header().await?;

        let metadata = serde_json::json!({ "mimeType": spec.mime_type });

        let response = self
            .http
            .patch(&url)
            .header(header::AUTHORIZATION, auth)
            .header("X-Upload-Content-Type", spec.mime_type.as_str())
            .header("X-Upload-Content-Length", total_size.to_string())
            .query(&[("uploadType", "resumable"), ("fields", FILE_FIELDS)])
            .json(&metadata)
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to start resumable update: {}", e)))?;

        session_uri(response).await
    }

    /// Upload a chunk to a resumable upload session.
    pub async fn upload_chunk(
        &self,
        upload_uri: &str,
        data: Vec<u8>,
        start_byte: u64,
        total_size: u64,
    ) -> Result<UploadStatus> {
        let content_range = if data.is_empty() {
            format!("bytes */{}", total_size)
        } else {
            let end_byte = start_byte + data.len() as u64 - 1;
            format!("bytes {}-{}/{}", start_byte, end_byte, total_size)
        };

        let response = self
            .http
            .put(upload_uri)
            .header(header::CONTENT_LENGTH, data.len().to_string())
            .header(header::CONTENT_RANGE, content_range)
            .body(Bytes::from(data))
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to upload chunk: {}", e)))?;

        upload_status(response).await
    }

    /// Ask the session how many bytes it has persisted.
    pub async fn query_upload_status(
        &self,
        upload_uri: &str,
        total_size: u64,
    ) -> Result<UploadStatus> {
        let response = self
            .http
            .put(upload_uri)
            .header(header::CONTENT_LENGTH, "0")
            .header(header::CONTENT_RANGE, format!("bytes */{}", total_size))
            .send()
            .await
            .map_err(|e| Error::Network(format!("Failed to query upload status: {}", e)))?;

        upload_status(response).await
    }

    /// Send `source` through an open upload session, resuming after
    /// transport failures.
    pub async fn upload_resumable(
        &self,
        upload_uri: &str,
        source: &mut UploadSource,
        progress: &ProgressFn,
    ) -> Result<DriveFile> {
        let total_size = source.size();
        let mut offset = 0u64;
        let mut resumes = 0u32;

        loop {
            let chunk = source.read_chunk(offset, CHUNK_SIZE).await?;
            let sent = chunk.len() as u64;

            let sent_chunk = self.upload_chunk(upload_uri, chunk, offset, total_size).await;
            let (status, resumed) = match sent_chunk {
                Ok(status) => (status, false),
                Err(Error::Network(msg)) if resumes < MAX_RESUMES => {
                    resumes += 1;
                    warn!(
                        "Chunk at offset {} failed ({}); resuming ({}/{})",
                        offset, msg, resumes, MAX_RESUMES
                    );
                    (self.query_upload_status(upload_uri, total_size).await?, true)
                }
                Err(e) => return Err(e),
            };

            match status {
                UploadStatus::Complete(file) => {
                    progress(total_size, total_size);
                    return Ok(file);
                }
                UploadStatus::Incomplete { next_offset } => {
                    if next_offset > total_size {
                        return Err(Error::Network(format!(
                            "Upload session acknowledged {} of {} bytes",
                            next_offset, total_size
                        )));
                    }
                    if !resumed && (sent == 0 || next_offset <= offset) {
                        return Err(Error::Network("Upload did not complete".to_string()));
                    }

                    debug!("Upload session acknowledged {} bytes", next_offset);
                    offset = next_offset;
                    progress(offset, total_size);
                }
            }
        }
    }
}

/// Extract the session URI from an upload-initiation response.
async fn session_uri(response: Response) -> Result<String> {
    if !response.status().is_success() {
        return Err(error_from_response(response).await);
    }

    response
        .headers()
        .get(header::LOCATION)
        .ok_or_else(|| Error::Network("No upload URI in response".to_string()))?
        .to_str()
        .map(str::to_string)
        .map_err(|e| Error::Network(format!("Invalid upload URI: {}", e)))
}

async fn upload_status(response: Response) -> Result<UploadStatus> {
    let status = response.status();

    if status == StatusCode::OK || status == StatusCode::CREATED {
        let file: DriveFile = response
            .json()
            .await
            .map_err(|e| Error::Network(format!("Failed to parse upload response: {}", e)))?;
        Ok(UploadStatus::Complete(file))
    } else if status == StatusCode::PERMANENT_REDIRECT {
        // More chunks needed (308 Resume Incomplete)
        let range = response
            .headers()
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok());
        let next_offset = next_offset_from_range(range).ok_or_else(|| {
            Error::Network(format!("Malformed Range header: {:?}", range))
        })?;
        Ok(UploadStatus::Incomplete { next_offset })
    } else {
        Err(error_from_response(response).await)
    }
}

async fn error_from_response(response: Response) -> Error {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    error_for_status(status, &body)
}

/// Map a non-success status to the common error taxonomy.
fn error_for_status(status: StatusCode, body: &str) -> Error {
    match status {
        StatusCode::NOT_FOUND => Error::NotFound(format!("Resource not found: {}", body)),
        StatusCode::UNAUTHORIZED => Error::Authentication("Invalid or expired token".to_string()),
        StatusCode::FORBIDDEN => Error::PermissionDenied(format!("Access denied: {}", body)),
        _ => Error::Network(format!("API error: {} - {}", status, body)),
    }
}
