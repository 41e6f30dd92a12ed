//! Remote storage plumbing for driveback.
//!
//! This crate provides a trait-based interface for the remote side of a
//! backup (Google Drive, or an in-memory stand-in), the OAuth2 token
//! lifecycle that authenticates against Google, and the on-disk token store
//! that lets a restarted process skip re-authorization.
//!
//! # Design Principles
//! - Provider isolation: no Drive specifics leak into the backup engine
//! - Async operations: all I/O operations are async
//! - Resumable uploads: archives are sent in chunks and can resume after a
//!   transport failure
//! - Unified error semantics: every provider reports through
//!   `driveback_common::Error`

pub mod gdrive;
pub mod memory;
pub mod provider;
pub mod registry;
pub mod token_store;

pub use gdrive::{AuthConfig, AuthManager, Authorizer, GDriveProvider, TokenManager, Tokens};
pub use memory::{MemoryRemote, RemoteOp};
pub use provider::{noop_progress, ObjectSpec, ProgressFn, RemoteFile, RemoteStore, UploadSource};
pub use registry::{create_default_registry, ProviderRegistry, RemoteFactory};
pub use token_store::TokenStore;
