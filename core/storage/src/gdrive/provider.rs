//! Google Drive remote store implementation.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use driveback_common::Result;

use crate::provider::{ObjectSpec, ProgressFn, RemoteFile, RemoteStore, UploadSource};

use super::auth::TokenManager;
use super::client::DriveClient;

/// Google Drive remote store.
///
/// Both create and update go through a resumable upload session, so large
/// archives never have to fit in a single request.
pub struct GDriveProvider {
    client: DriveClient,
}

impl GDriveProvider {
    /// Create a new Google Drive provider.
    ///
    /// # Errors
    /// - HTTP client construction failed
    pub fn new(token_manager: Arc<TokenManager>) -> Result<Self> {
        Ok(Self {
            client: DriveClient::new(token_manager)?,
        })
    }
}

#[async_trait]
impl RemoteStore for GDriveProvider {
    fn name(&self) -> &str {
        "gdrive"
    }

    async fn create(
        &self,
        spec: &ObjectSpec,
        source: &mut UploadSource,
        progress: ProgressFn,
    ) -> Result<RemoteFile> {
        let upload_uri = self
            .client
            .start_resumable_create(spec, source.size())
            .await?;
        debug!("Opened create session for {}", spec.name);

        let file = self
            .client
            .upload_resumable(&upload_uri, source, &progress)
            .await?;

        Ok(file.into())
    }

    async fn update(
        &self,
        file_id: &str,
        spec: &ObjectSpec,
        source: &mut UploadSource,
        progress: ProgressFn,
    ) -> Result<RemoteFile> {
        let upload_uri = self
            .client
            .start_resumable_update(file_id, spec, source.size())
            .await?;
        debug!("Opened update session for {}", file_id);

        let file = self
            .client
            .upload_resumable(&upload_uri, source, &progress)
            .await?;

        Ok(file.into())
    }
}
