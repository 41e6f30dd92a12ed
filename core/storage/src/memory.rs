//! In-memory remote store for testing and dry runs.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::sync::Mutex;

use driveback_common::{Error, Result};

use crate::provider::{ObjectSpec, ProgressFn, RemoteFile, RemoteStore, UploadSource};

/// A call observed by [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteOp {
    Create { id: String },
    Update { id: String },
}

#[derive(Debug, Clone)]
struct StoredObject {
    spec: ObjectSpec,
    data: Vec<u8>,
}

#[derive(Default)]
struct MemoryState {
    objects: HashMap<String, StoredObject>,
    ops: Vec<RemoteOp>,
    failures: VecDeque<Error>,
    next_id: u64,
}

/// In-memory remote store.
///
/// Identifiers are assigned sequentially (`mem-1`, `mem-2`, ...). Every
/// completed call is recorded so tests can assert on the create/update
/// sequence. All data is lost on drop.
pub struct MemoryRemote {
    state: Mutex<MemoryState>,
    delay: Option<Duration>,
}

impl MemoryRemote {
    /// Create a new empty memory remote.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
            delay: None,
        }
    }

    /// Make every upload take `delay`, to simulate transfer time.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail the next call with `error`. Queued failures are consumed in order.
    pub async fn queue_failure(&self, error: Error) {
        self.state.lock().await.failures.push_back(error);
    }

    /// Pre-populate an object, as if created earlier.
    pub async fn insert_object(&self, id: impl Into<String>, spec: ObjectSpec, data: Vec<u8>) {
        self.state
            .lock()
            .await
            .objects
            .insert(id.into(), StoredObject { spec, data });
    }

    /// Content of object `id`.
    pub async fn object(&self, id: &str) -> Option<Vec<u8>> {
        self.state.lock().await.objects.get(id).map(|o| o.data.clone())
    }

    /// Name of object `id`.
    pub async fn object_name(&self, id: &str) -> Option<String> {
        self.state.lock().await.objects.get(id).map(|o| o.spec.name.clone())
    }

    /// Number of stored objects.
    pub async fn len(&self) -> usize {
        self.state.lock().await.objects.len()
    }

    /// Whether no objects are stored.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Completed calls, in completion order.
    pub async fn ops(&self) -> Vec<RemoteOp> {
        self.state.lock().await.ops.clone()
    }

    /// Number of completed create calls.
    pub async fn create_count(&self) -> usize {
        self.ops()
            .await
            .iter()
            .filter(|op| matches!(op, RemoteOp::Create { .. }))
            .count()
    }

    /// Number of completed update calls.
    pub async fn update_count(&self) -> usize {
        self.ops()
            .await
            .iter()
            .filter(|op| matches!(op, RemoteOp::Update { .. }))
            .count()
    }

    /// Read `source`, honoring the configured delay and queued failures.
    async fn receive(&self, source: &mut UploadSource, progress: &ProgressFn) -> Result<Vec<u8>> {
        if let Some(error) = self.state.lock().await.failures.pop_front() {
            return Err(error);
        }

        let data = source.read_all().await?;

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let total = data.len() as u64;
        progress(total, total);

        Ok(data)
    }

    fn remote_file(id: &str, spec: &ObjectSpec, size: usize) -> RemoteFile {
        RemoteFile {
            id: id.to_string(),
            name: Some(spec.name.clone()),
            mime_type: Some(spec.mime_type.clone()),
            size: Some(size as u64),
            modified: Some(Utc::now()),
        }
    }
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    fn name(&self) -> &str {
        "memory"
    }

    async fn create(
        &self,
        spec: &ObjectSpec,
        source: &mut UploadSource,
        progress: ProgressFn,
    ) -> Result<RemoteFile> {
        let data = self.receive(source, &progress).await?;
        let size = data.len();

        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = format!("mem-{}", state.next_id);

        state.objects.insert(
            id.clone(),
            StoredObject {
                spec: spec.clone(),
                data,
            },
        );
        state.ops.push(RemoteOp::Create { id: id.clone() });

        Ok(Self::remote_file(&id, spec, size))
    }

    async fn update(
        &self,
        file_id: &str,
        spec: &ObjectSpec,
        source: &mut UploadSource,
        progress: ProgressFn,
    ) -> Result<RemoteFile> {
        if !self.state.lock().await.objects.contains_key(file_id) {
            return Err(Error::NotFound(format!("File not found: {}", file_id)));
        }

        let data = self.receive(source, &progress).await?;
        let size = data.len();

        let mut state = self.state.lock().await;
        let object = state
            .objects
            .get_mut(file_id)
            .ok_or_else(|| Error::NotFound(format!("File not found: {}", file_id)))?;
        object.data = data;
        object.spec.mime_type = spec.mime_type.clone();
        let stored_spec = object.spec.clone();
        state.ops.push(RemoteOp::Update {
            id: file_id.to_string(),
        });

        Ok(Self::remote_file(file_id, &stored_spec, size))
    }
}
