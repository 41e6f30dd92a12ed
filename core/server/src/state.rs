//! Shared handler state.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use driveback_backup::{Authenticator, BackupEngine};

/// State shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<BackupEngine>,
    pub auth: Arc<Authenticator>,
    /// Cancelled on shutdown; stops the listener and any in-flight upload.
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(engine: Arc<BackupEngine>, auth: Arc<Authenticator>) -> Self {
        Self {
            engine,
            auth,
            shutdown: CancellationToken::new(),
        }
    }

    /// Use an externally owned shutdown token.
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}
