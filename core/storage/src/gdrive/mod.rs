//! Google Drive remote store for driveback.
//!
//! This module provides the backup destination on Google Drive with:
//! - OAuth2 authentication with automatic token refresh
//! - Chunked/resumable uploads that resume after transport failures
//! - Create and in-place update of a single backup object

pub mod auth;
pub mod client;
pub mod provider;

pub use auth::{AuthConfig, AuthManager, Authorizer, TokenManager, Tokens, DRIVE_SCOPE};
pub use client::{DriveClient, DriveFile, UploadStatus};
pub use provider::GDriveProvider;
