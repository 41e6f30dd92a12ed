//! Common error types for driveback.

use thiserror::Error;

/// Top-level error type for driveback operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Local I/O failed (archive, token file, state file).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid input provided.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource already exists.
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// OAuth2 exchange or refresh failed, or the provider rejected the token.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// No token is available yet; the operator has to complete the
    /// authorization flow first.
    #[error("Authorization pending: {0}")]
    AuthorizationPending(String),

    /// The provider denied access to the resource.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Transport failure or provider API error.
    #[error("Network error: {0}")]
    Network(String),

    /// Operation exceeded its deadline.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Operation was cancelled (e.g. during shutdown).
    #[error("Cancelled: {0}")]
    Cancelled(String),
}

impl Error {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Network(_) | Error::Io(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
