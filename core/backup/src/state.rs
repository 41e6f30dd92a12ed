//! Backup state tracking and persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use driveback_common::Result;
use driveback_storage::RemoteFile;

/// What the service knows about the current backup object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupState {
    /// Remote identifier of the backup object; `None` until the first
    /// create succeeds.
    #[serde(default)]
    pub file_id: Option<String>,
    /// Completion time of the last successful backup.
    #[serde(default)]
    pub last_backup_at: Option<DateTime<Utc>>,
    /// Archive size uploaded by the last successful backup.
    #[serde(default)]
    pub last_size_bytes: Option<u64>,
    /// Successful backups since the state was created.
    #[serde(default)]
    pub backups_completed: u64,
}

impl BackupState {
    /// State seeded with a known remote identifier. Empty strings count as
    /// no identifier.
    pub fn with_file_id(file_id: Option<String>) -> Self {
        Self {
            file_id: file_id.filter(|id| !id.is_empty()),
            ..Self::default()
        }
    }

    /// The identifier to pass to the backup operation; empty means
    /// "create".
    pub fn current_id(&self) -> &str {
        self.file_id.as_deref().unwrap_or("")
    }

    /// Record a completed backup.
    pub fn record_success(&mut self, file: &RemoteFile, size_bytes: u64) {
        self.file_id = Some(file.id.clone());
        self.last_backup_at = Some(Utc::now());
        self.last_size_bytes = Some(size_bytes);
        self.backups_completed += 1;
    }
}

/// Durable storage for [`BackupState`].
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// crash mid-write leaves the previous state intact.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Create a store backed by `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the state file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored state, or `None` if nothing has been saved yet.
    pub async fn load(&self) -> Result<Option<BackupState>> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Atomically replace the stored state.
    pub async fn save(&self, state: &BackupState) -> Result<()> {
        let json = serde_json::to_vec_pretty(state)?;

        let mut tmp_name = self.path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        tokio::fs::write(&tmp_path, &json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;

        Ok(())
    }
}
