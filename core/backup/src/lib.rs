//! Backup orchestration for driveback.
//!
//! This crate owns the create-or-update backup protocol:
//! - The backup engine decides between creating a new remote object and
//!   updating the known one, and serializes runs so only one upload is in
//!   flight
//! - Backup state (the remote file identifier) with optional durable storage
//! - Retry with exponential backoff for idempotent remote calls
//! - The authorization gate that holds requests until OAuth2 completes

pub mod authenticator;
pub mod engine;
pub mod retry;
pub mod state;

pub use authenticator::Authenticator;
pub use engine::{BackupConfig, BackupEngine, BackupOutcome};
pub use retry::{RetryConfig, RetryExecutor};
pub use state::{BackupState, StateStore};
