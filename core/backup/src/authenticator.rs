//! Authorization gate between the HTTP trigger and the remote store.
//!
//! With a stored token the gate opens immediately. Otherwise it stays
//! pending until the OAuth2 provider redirects back with a code, and
//! every caller asking for the remote gets `Error::AuthorizationPending`
//! in the meantime.

use std::sync::Arc;
use subtle::ConstantTimeEq;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

use driveback_common::{Error, Result};
use driveback_storage::{
    Authorizer, ProviderRegistry, RemoteStore, TokenManager, TokenStore, Tokens,
};

enum Session {
    Pending { url: String, csrf_state: String },
    Ready(Arc<dyn RemoteStore>),
}

/// Holds the remote store once OAuth2 authorization has completed.
pub struct Authenticator {
    authorizer: Arc<dyn Authorizer>,
    token_store: TokenStore,
    registry: ProviderRegistry,
    provider: String,
    session: RwLock<Session>,
    /// Serializes callbacks; never held by readers of `session`.
    completing: Mutex<()>,
}

impl Authenticator {
    /// Build the gate, opening it right away if `token_store` holds a token.
    ///
    /// A missing or unreadable token file leaves the gate pending and logs
    /// the authorization URL.
    ///
    /// # Errors
    /// - `Error::NotFound` if `provider` is not registered
    /// - `Error::Io` if the token file exists but cannot be read
    pub async fn start(
        authorizer: Arc<dyn Authorizer>,
        token_store: TokenStore,
        registry: ProviderRegistry,
        provider: impl Into<String>,
    ) -> Result<Self> {
        let provider = provider.into();
        if !registry.has_provider(&provider) {
            return Err(Error::NotFound(format!(
                "Unknown provider '{}' (available: {})",
                provider,
                registry.providers().join(", ")
            )));
        }

        let session = match token_store.load().await {
            Ok(tokens) => {
                info!("Using stored token from {}", token_store.path().display());
                let remote =
                    build_remote(&authorizer, &token_store, &registry, &provider, tokens)?;
                Session::Ready(remote)
            }
            Err(Error::NotFound(_)) => pending_session(authorizer.as_ref()),
            Err(Error::Serialization(e)) => {
                warn!(
                    "Ignoring unreadable token file {}: {}",
                    token_store.path().display(),
                    e
                );
                pending_session(authorizer.as_ref())
            }
            Err(e) => return Err(e),
        };

        Ok(Self {
            authorizer,
            token_store,
            registry,
            provider,
            session: RwLock::new(session),
            completing: Mutex::new(()),
        })
    }

    /// Whether authorization has completed.
    pub async fn is_authorized(&self) -> bool {
        matches!(&*self.session.read().await, Session::Ready(_))
    }

    /// The URL the operator must visit, while authorization is pending.
    pub async fn authorization_url(&self) -> Option<String> {
        match &*self.session.read().await {
            Session::Pending { url, .. } => Some(url.clone()),
            Session::Ready(_) => None,
        }
    }

    /// The authenticated remote store.
    ///
    /// # Errors
    /// - `Error::AuthorizationPending` until [`complete`](Self::complete)
    ///   succeeds
    pub async fn remote(&self) -> Result<Arc<dyn RemoteStore>> {
        match &*self.session.read().await {
            Session::Ready(remote) => Ok(remote.clone()),
            Session::Pending { url, .. } => Err(Error::AuthorizationPending(format!(
                "Visit {} to authorize",
                url
            ))),
        }
    }

    /// Finish authorization with the `code` and `state` from the provider
    /// redirect.
    ///
    /// On failure the gate stays pending, so the operator can retry through
    /// the same URL.
    ///
    /// # Errors
    /// - `Error::AlreadyExists` if authorization already completed
    /// - `Error::InvalidInput` if `state` does not match
    /// - `Error::Authentication` if the code exchange fails
    pub async fn complete(&self, code: &str, state: &str) -> Result<()> {
        let _completing = self.completing.lock().await;

        let expected = match &*self.session.read().await {
            Session::Ready(_) => {
                return Err(Error::AlreadyExists("Already authorized".to_string()));
            }
            Session::Pending { csrf_state, .. } => csrf_state.clone(),
        };

        if !bool::from(state.as_bytes().ct_eq(expected.as_bytes())) {
            warn!("Rejected authorization callback with mismatched state");
            return Err(Error::InvalidInput("CSRF state mismatch".to_string()));
        }

        // The exchange talks to the provider; readers keep getting
        // `AuthorizationPending` until the remote is installed below.
        let tokens = self.authorizer.exchange_code(code).await?;

        if let Err(e) = self.token_store.save(&tokens).await {
            warn!("Failed to save token: {}", e);
        }

        let remote = build_remote(
            &self.authorizer,
            &self.token_store,
            &self.registry,
            &self.provider,
            tokens,
        )?;
        *self.session.write().await = Session::Ready(remote);

        info!("Authorization complete; backups enabled");
        Ok(())
    }
}

fn pending_session(authorizer: &dyn Authorizer) -> Session {
    let (url, csrf_state) = authorizer.authorization_url();
    info!("Go to the following link in your browser to authorize: {}", url);
    Session::Pending { url, csrf_state }
}

fn build_remote(
    authorizer: &Arc<dyn Authorizer>,
    token_store: &TokenStore,
    registry: &ProviderRegistry,
    provider: &str,
    tokens: Tokens,
) -> Result<Arc<dyn RemoteStore>> {
    let token_manager =
        TokenManager::new(authorizer.clone(), tokens).with_store(token_store.clone());
    registry.resolve(provider, Arc::new(token_manager))
}
