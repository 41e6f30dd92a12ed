//! Remote store trait definition.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use driveback_common::Result;

/// Metadata for an object stored on the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteFile {
    /// Provider-assigned identifier.
    pub id: String,
    /// Object name, when reported by the provider.
    pub name: Option<String>,
    /// MIME type, when reported by the provider.
    pub mime_type: Option<String>,
    /// Size in bytes, when reported by the provider.
    pub size: Option<u64>,
    /// Last modification time.
    pub modified: Option<DateTime<Utc>>,
}

/// Name and type under which the archive is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectSpec {
    /// Remote object name (used on create only).
    pub name: String,
    /// MIME type of the uploaded content.
    pub mime_type: String,
    /// Optional parent folder for newly created objects.
    #[serde(default)]
    pub parent_id: Option<String>,
}

impl ObjectSpec {
    /// Spec for a zip archive with the given remote name.
    pub fn zip(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            mime_type: "application/zip".to_string(),
            parent_id: None,
        }
    }

    /// Place newly created objects in `parent_id`.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// Progress callback, invoked with `(bytes_sent, total_bytes)`.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// A progress callback that ignores every update.
pub fn noop_progress() -> ProgressFn {
    Arc::new(|_, _| {})
}

/// A local file opened for upload.
///
/// The size is captured once at open time and is what gets announced to the
/// provider. Reads are positional so an interrupted upload can restart from
/// any acknowledged offset.
#[derive(Debug)]
pub struct UploadSource {
    file: File,
    size: u64,
    path: PathBuf,
}

impl UploadSource {
    /// Open `path` and stat it.
    ///
    /// # Errors
    /// - `Error::Io` if the file cannot be opened or stat'ed
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).await?;
        let size = file.metadata().await?.len();

        Ok(Self { file, size, path })
    }

    /// Total size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Path the source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read up to `max_len` bytes starting at `offset`.
    ///
    /// Returns an empty buffer once `offset` reaches the end.
    pub async fn read_chunk(&mut self, offset: u64, max_len: usize) -> Result<Vec<u8>> {
        let remaining = self.size.saturating_sub(offset);
        let len = remaining.min(max_len as u64) as usize;
        let mut buf = vec![0u8; len];

        if len > 0 {
            self.file.seek(SeekFrom::Start(offset)).await?;
            self.file.read_exact(&mut buf).await?;
        }

        Ok(buf)
    }

    /// Read the whole file from the start.
    pub async fn read_all(&mut self) -> Result<Vec<u8>> {
        self.read_chunk(0, self.size as usize).await
    }
}

/// Remote store trait for backup destinations.
///
/// Implementations must handle their own authentication. The `source` is
/// borrowed mutably so a caller can retry the same upload without reopening
/// the file.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Get the provider name (e.g., "gdrive", "memory").
    fn name(&self) -> &str;

    /// Create a new remote object from `source`.
    ///
    /// # Postconditions
    /// - A new object exists remotely; its identifier is returned
    ///
    /// # Errors
    /// - Network/provider errors
    /// - Authentication errors
    /// - Local I/O errors while reading `source`
    async fn create(
        &self,
        spec: &ObjectSpec,
        source: &mut UploadSource,
        progress: ProgressFn,
    ) -> Result<RemoteFile>;

    /// Replace the content of the existing object `file_id`.
    ///
    /// # Errors
    /// - `Error::NotFound` if no object has that identifier
    /// - Network/provider errors
    /// - Authentication errors
    async fn update(
        &self,
        file_id: &str,
        spec: &ObjectSpec,
        source: &mut UploadSource,
        progress: ProgressFn,
    ) -> Result<RemoteFile>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use driveback_common::Error;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_missing_file_is_io_error() {
        let dir = TempDir::new().unwrap();
        let result = UploadSource::open(dir.path().join("folder.zip")).await;

        assert!(matches!(result, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn test_read_chunks() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("folder.zip");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let mut source = UploadSource::open(&path).await.unwrap();
        assert_eq!(source.size(), 10);
        assert_eq!(source.read_chunk(0, 4).await.unwrap(), b"0123");
        assert_eq!(source.read_chunk(8, 4).await.unwrap(), b"89");
        assert!(source.read_chunk(10, 4).await.unwrap().is_empty());
        // Positional reads can go backwards.
        assert_eq!(source.read_chunk(4, 2).await.unwrap(), b"45");
        assert_eq!(source.read_all().await.unwrap(), b"0123456789");
    }

    #[test]
    fn test_zip_spec() {
        let spec = ObjectSpec::zip("test_folder.zip").with_parent("folder-1");

        assert_eq!(spec.mime_type, "application/zip");
        assert_eq!(spec.parent_id.as_deref(), Some("folder-1"));
    }
}
