//! Backup engine: the create-or-update protocol and its guarded runner.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use driveback_common::{Error, Result};
use driveback_storage::{ObjectSpec, ProgressFn, RemoteFile, RemoteStore, UploadSource};

use crate::retry::{RetryConfig, RetryExecutor};
use crate::state::{BackupState, StateStore};

/// Configuration for the backup engine.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Local archive uploaded on every run.
    pub archive_path: PathBuf,
    /// Remote name, MIME type and parent folder of the backup object.
    pub object: ObjectSpec,
    /// Retry policy for updates.
    pub retry: RetryConfig,
    /// Upper bound on a single guarded run.
    pub timeout: Duration,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            archive_path: PathBuf::from("folder.zip"),
            object: ObjectSpec::zip("test_folder.zip"),
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Result of a completed backup.
#[derive(Debug, Clone)]
pub struct BackupOutcome {
    /// The remote object as reported by the provider.
    pub file: RemoteFile,
    /// Identifier the backup started from, if any.
    pub previous_id: Option<String>,
    /// Whether a new remote object was created.
    pub created: bool,
    /// Bytes uploaded.
    pub size_bytes: u64,
    /// Wall time of the upload.
    pub duration: Duration,
}

/// Uploads the local archive and tracks the remote identifier.
///
/// Runs are serialized: a trigger arriving while another upload is in flight
/// waits for it (tokio's mutex is FIFO), then reads the identifier the
/// previous run left behind. Reading the identifier, uploading and storing
/// the result all happen under one lock.
pub struct BackupEngine {
    config: BackupConfig,
    retry: RetryExecutor,
    run_lock: Mutex<()>,
    state: RwLock<BackupState>,
    store: Option<StateStore>,
}

impl BackupEngine {
    /// Create an engine with empty state.
    pub fn new(config: BackupConfig) -> Self {
        Self::with_state(config, BackupState::default())
    }

    /// Create an engine starting from `state`.
    pub fn with_state(config: BackupConfig, state: BackupState) -> Self {
        let retry = RetryExecutor::new(config.retry.clone());
        Self {
            config,
            retry,
            run_lock: Mutex::new(()),
            state: RwLock::new(state),
            store: None,
        }
    }

    /// Persist state to `store` after every successful run.
    pub fn with_store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Create an engine, seeding the identifier from `store` if it holds a
    /// saved state, else from `seed_id`.
    pub async fn restore(
        config: BackupConfig,
        store: Option<StateStore>,
        seed_id: Option<String>,
    ) -> Result<Self> {
        let saved = match &store {
            Some(store) => store.load().await?,
            None => None,
        };

        let state = match saved {
            Some(state) => {
                info!(
                    "Restored backup state ({} completed, file id {:?})",
                    state.backups_completed, state.file_id
                );
                state
            }
            None => BackupState::with_file_id(seed_id),
        };

        let engine = Self::with_state(config, state);
        Ok(match store {
            Some(store) => engine.with_store(store),
            None => engine,
        })
    }

    /// Engine configuration.
    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Snapshot of the current state.
    pub async fn state(&self) -> BackupState {
        self.state.read().await.clone()
    }

    /// Upload the archive once.
    ///
    /// An empty `remote_id` creates a new object; otherwise the object named
    /// by `remote_id` is updated. Updates are retried on transient errors;
    /// creates are not, since a retried create could leave a duplicate.
    ///
    /// This does not consult or modify the engine state. Use [`run`] for the
    /// serialized, state-tracking variant.
    ///
    /// # Errors
    /// - `Error::Io` if the archive cannot be opened
    /// - Any error reported by the remote store
    ///
    /// [`run`]: BackupEngine::run
    pub async fn backup(&self, remote: &dyn RemoteStore, remote_id: &str) -> Result<BackupOutcome> {
        let started = Instant::now();
        let mut source = UploadSource::open(&self.config.archive_path).await?;
        let size_bytes = source.size();

        let progress: ProgressFn = Arc::new(|sent, total| {
            debug!("{}B / {}B total", sent, total);
        });

        let (file, created) = if remote_id.is_empty() {
            info!("Creating backup...");
            let file = remote
                .create(&self.config.object, &mut source, progress)
                .await?;
            (file, true)
        } else {
            info!("Updating backup {}...", remote_id);
            let source = Mutex::new(source);
            let object = &self.config.object;
            let file = self
                .retry
                .execute(|| {
                    let progress = progress.clone();
                    let source = &source;
                    async move {
                        let mut source = source.lock().await;
                        remote.update(remote_id, object, &mut source, progress).await
                    }
                })
                .await?;
            (file, false)
        };

        info!("Backup complete");

        Ok(BackupOutcome {
            file,
            previous_id: (!remote_id.is_empty()).then(|| remote_id.to_string()),
            created,
            size_bytes,
            duration: started.elapsed(),
        })
    }

    /// Run one serialized backup against the stored identifier.
    ///
    /// Waits for any in-flight run, uploads under the configured timeout and
    /// records the resulting identifier. State is left untouched on failure.
    ///
    /// # Errors
    /// - `Error::Cancelled` if `cancel` fires while waiting or uploading
    /// - `Error::Timeout` if the upload exceeds the configured timeout
    /// - Any error from [`backup`](BackupEngine::backup)
    pub async fn run(
        &self,
        remote: &dyn RemoteStore,
        cancel: &CancellationToken,
    ) -> Result<BackupOutcome> {
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled("Shutdown before backup started".to_string()));
            }
            guard = self.run_lock.lock() => guard,
        };

        let remote_id = self.state.read().await.current_id().to_string();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(Error::Cancelled("Backup interrupted by shutdown".to_string()));
            }
            result = tokio::time::timeout(self.config.timeout, self.backup(remote, &remote_id)) => {
                match result {
                    Ok(outcome) => outcome?,
                    Err(_) => {
                        return Err(Error::Timeout(format!(
                            "Backup did not finish within {:?}",
                            self.config.timeout
                        )));
                    }
                }
            }
        };

        let snapshot = {
            let mut state = self.state.write().await;
            state.record_success(&outcome.file, outcome.size_bytes);
            state.clone()
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&snapshot).await {
                error!(
                    "Failed to persist backup state to {}: {}",
                    store.path().display(),
                    e
                );
            }
        }

        info!(
            "Backup of {} bytes stored as {} in {:?}",
            outcome.size_bytes, outcome.file.id, outcome.duration
        );

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driveback_storage::MemoryRemote;
    use tempfile::TempDir;

    async fn engine_in(dir: &TempDir, contents: &[u8]) -> BackupEngine {
        let archive_path = dir.path().join("folder.zip");
        tokio::fs::write(&archive_path, contents).await.unwrap();

        BackupEngine::new(test_config(archive_path))
    }

    fn test_config(archive_path: PathBuf) -> BackupConfig {
        BackupConfig {
            archive_path,
            retry: RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
            ..BackupConfig::default()
        }
    }

    #[tokio::test]
    async fn test_first_run_creates_then_updates() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir, b"archive v1").await;
        let remote = MemoryRemote::new();
        let cancel = CancellationToken::new();

        let first = engine.run(&remote, &cancel).await.unwrap();
        assert!(first.created);
        assert_eq!(first.file.id, "mem-1");
        assert_eq!(first.previous_id, None);
        assert_eq!(engine.state().await.current_id(), "mem-1");

        tokio::fs::write(dir.path().join("folder.zip"), b"archive v2")
            .await
            .unwrap();
        let second = engine.run(&remote, &cancel).await.unwrap();
        assert!(!second.created);
        assert_eq!(second.previous_id.as_deref(), Some("mem-1"));

        assert_eq!(remote.create_count().await, 1);
        assert_eq!(remote.update_count().await, 1);
        assert_eq!(remote.object("mem-1").await.unwrap(), b"archive v2");

        let state = engine.state().await;
        assert_eq!(state.backups_completed, 2);
        assert_eq!(state.last_size_bytes, Some(10));
    }

    #[tokio::test]
    async fn test_update_targets_given_id() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir, b"data").await;
        let remote = MemoryRemote::new();
        remote
            .insert_object("existing", ObjectSpec::zip("test_folder.zip"), Vec::new())
            .await;

        let outcome = engine.backup(&remote, "existing").await.unwrap();

        assert_eq!(outcome.file.id, "existing");
        assert_eq!(remote.create_count().await, 0);
        assert_eq!(remote.object("existing").await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_missing_archive_is_io_error() {
        let dir = TempDir::new().unwrap();
        let engine = BackupEngine::new(test_config(dir.path().join("missing.zip")));
        let remote = MemoryRemote::new();

        let result = engine.run(&remote, &CancellationToken::new()).await;

        assert!(matches!(result, Err(Error::Io(_))));
        assert!(remote.ops().await.is_empty());
        assert_eq!(engine.state().await, BackupState::default());
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_serialized() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(engine_in(&dir, b"archive").await);
        let remote = Arc::new(MemoryRemote::new().with_delay(Duration::from_millis(20)));
        let cancel = CancellationToken::new();

        let mut handles = Vec::new();
        for _ in 0..5 {
            let engine = engine.clone();
            let remote = remote.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                engine.run(remote.as_ref(), &cancel).await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(remote.create_count().await, 1);
        assert_eq!(remote.update_count().await, 4);
        assert_eq!(remote.len().await, 1);
        assert_eq!(engine.state().await.current_id(), "mem-1");
        assert_eq!(engine.state().await.backups_completed, 5);
    }

    #[tokio::test]
    async fn test_transient_update_failures_are_retried() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir, b"data").await;
        let remote = MemoryRemote::new();
        remote
            .insert_object("mem-7", ObjectSpec::zip("test_folder.zip"), Vec::new())
            .await;
        remote
            .queue_failure(Error::Network("connection reset".to_string()))
            .await;
        remote
            .queue_failure(Error::Network("connection reset".to_string()))
            .await;

        let outcome = engine.backup(&remote, "mem-7").await.unwrap();

        assert_eq!(outcome.file.id, "mem-7");
        assert_eq!(remote.update_count().await, 1);
        assert_eq!(remote.object("mem-7").await.unwrap(), b"data");
    }

    #[tokio::test]
    async fn test_permanent_update_failure_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir, b"data").await;
        let remote = MemoryRemote::new();
        remote
            .insert_object("mem-7", ObjectSpec::zip("test_folder.zip"), Vec::new())
            .await;
        remote
            .queue_failure(Error::PermissionDenied("read-only".to_string()))
            .await;
        remote
            .queue_failure(Error::Network("would succeed on retry".to_string()))
            .await;

        let result = engine.backup(&remote, "mem-7").await;

        assert!(matches!(result, Err(Error::PermissionDenied(_))));
        assert_eq!(remote.update_count().await, 0);
    }

    #[tokio::test]
    async fn test_create_is_not_retried() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir, b"data").await;
        let remote = MemoryRemote::new();
        remote
            .queue_failure(Error::Network("connection reset".to_string()))
            .await;

        let result = engine.run(&remote, &CancellationToken::new()).await;

        assert!(matches!(result, Err(Error::Network(_))));
        assert_eq!(remote.create_count().await, 0);
        assert_eq!(engine.state().await.current_id(), "");

        // The next trigger creates normally.
        engine.run(&remote, &CancellationToken::new()).await.unwrap();
        assert_eq!(remote.create_count().await, 1);
    }

    #[tokio::test]
    async fn test_timeout_leaves_state_unchanged() {
        let dir = TempDir::new().unwrap();
        let archive_path = dir.path().join("folder.zip");
        tokio::fs::write(&archive_path, b"data").await.unwrap();
        let config = BackupConfig {
            timeout: Duration::from_millis(50),
            ..test_config(archive_path)
        };
        let engine = BackupEngine::new(config);
        let remote = MemoryRemote::new().with_delay(Duration::from_secs(5));

        let result = engine.run(&remote, &CancellationToken::new()).await;

        assert!(matches!(result, Err(Error::Timeout(_))));
        assert_eq!(engine.state().await, BackupState::default());
        assert!(remote.is_empty().await);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_upload() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir, b"data").await;
        let remote = MemoryRemote::new().with_delay(Duration::from_secs(5));
        let cancel = CancellationToken::new();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result = engine.run(&remote, &cancel).await;

        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert_eq!(engine.state().await.current_id(), "");
    }

    #[tokio::test]
    async fn test_cancelled_token_skips_upload() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir, b"data").await;
        let remote = MemoryRemote::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = engine.run(&remote, &cancel).await;

        assert!(matches!(result, Err(Error::Cancelled(_))));
        assert!(remote.ops().await.is_empty());
    }

    #[tokio::test]
    async fn test_state_is_persisted_and_restored() {
        let dir = TempDir::new().unwrap();
        let archive_path = dir.path().join("folder.zip");
        tokio::fs::write(&archive_path, b"data").await.unwrap();
        let store = StateStore::new(dir.path().join("state.json"));
        let remote = MemoryRemote::new();

        let engine =
            BackupEngine::restore(test_config(archive_path.clone()), Some(store.clone()), None)
                .await
                .unwrap();
        engine.run(&remote, &CancellationToken::new()).await.unwrap();

        // The saved state wins over the seed.
        let restored = BackupEngine::restore(
            test_config(archive_path),
            Some(store),
            Some("ignored-seed".to_string()),
        )
        .await
        .unwrap();
        let state = restored.state().await;
        assert_eq!(state.current_id(), "mem-1");
        assert_eq!(state.backups_completed, 1);
    }

    #[tokio::test]
    async fn test_seed_used_without_saved_state() {
        let dir = TempDir::new().unwrap();
        let store = StateStore::new(dir.path().join("state.json"));

        let engine = BackupEngine::restore(
            test_config(dir.path().join("folder.zip")),
            Some(store),
            Some("seeded".to_string()),
        )
        .await
        .unwrap();
        assert_eq!(engine.state().await.current_id(), "seeded");

        let engine = BackupEngine::restore(BackupConfig::default(), None, None)
            .await
            .unwrap();
        assert_eq!(engine.state().await.current_id(), "");
    }
}
