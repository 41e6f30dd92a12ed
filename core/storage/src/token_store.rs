//! On-disk persistence of the OAuth2 token.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::info;

use driveback_common::{Error, Result};

use crate::gdrive::Tokens;

/// Owner read/write only.
#[cfg(unix)]
const TOKEN_FILE_MODE: u32 = 0o600;

/// Reads and writes the token record at a fixed path.
///
/// The file is plain JSON; it is not encrypted, only restricted to the
/// owning user on Unix.
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    /// Create a store backed by `path` (typically `token.json`).
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the token file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the stored token.
    ///
    /// # Errors
    /// - `Error::NotFound` if no token file exists
    /// - `Error::Serialization` if the file is not a valid token record
    /// - `Error::Io` for other read failures
    pub async fn load(&self) -> Result<Tokens> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(format!(
                    "No token file at {}",
                    self.path.display()
                )));
            }
            Err(e) => return Err(e.into()),
        };

        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Save `tokens`, replacing any previous record.
    ///
    /// # Postconditions
    /// - The file exists with mode 0600 on Unix
    pub async fn save(&self, tokens: &Tokens) -> Result<()> {
        info!("Saving credential file to: {}", self.path.display());

        let json = serde_json::to_vec_pretty(tokens)?;

        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(TOKEN_FILE_MODE);

        let mut file = options.open(&self.path).await?;
        file.write_all(&json).await?;
        file.flush().await?;

        // `mode` only applies on creation; tighten a pre-existing file too.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(
                &self.path,
                std::fs::Permissions::from_mode(TOKEN_FILE_MODE),
            )
            .await?;
        }

        Ok(())
    }
}
