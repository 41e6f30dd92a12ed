//! OAuth2 authentication and token management for Google Drive.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::BasicClient;
use oauth2::{
    reqwest, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet,
    EndpointSet, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use zeroize::{Zeroize, ZeroizeOnDrop};

use driveback_common::{Error, Result};

use crate::token_store::TokenStore;

/// OAuth2 authorization endpoint.
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
/// OAuth2 token endpoint.
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Redirect URL for OAuth2 flow (served by the trigger's callback route).
const REDIRECT_URL: &str = "http://localhost:8080/callback";

/// Full Drive scope; updating an object created elsewhere needs more than
/// `drive.file`.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";

fn default_token_type() -> String {
    "Bearer".to_string()
}

/// OAuth2 tokens with expiration tracking.
///
/// Field names follow the `token.json` layout written by Google's Go
/// quickstart, so an existing token file keeps working.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct Tokens {
    /// Access token for API requests.
    pub access_token: String,
    /// Token type, normally "Bearer".
    #[serde(default = "default_token_type")]
    #[zeroize(skip)]
    pub token_type: String,
    /// Refresh token for obtaining new access tokens. May be empty.
    #[serde(default)]
    pub refresh_token: String,
    /// When the access token expires.
    #[serde(rename = "expiry")]
    #[zeroize(skip)]
    pub expires_at: DateTime<Utc>,
}

impl Tokens {
    /// Create a bearer token set.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            refresh_token: refresh_token.into(),
            expires_at,
        }
    }

    /// Check if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        // Consider expired if less than 5 minutes remaining
        self.expires_at < Utc::now() + Duration::minutes(5)
    }

    /// Whether a refresh token is available.
    pub fn can_refresh(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

impl fmt::Debug for Tokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokens")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("refresh_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Configuration for OAuth2 authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub token_url: String,
    /// Redirect URL for OAuth2 callback.
    pub redirect_url: String,
}

/// Client secret file as downloaded from the Google Cloud console.
#[derive(Deserialize)]
struct CredentialsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

#[derive(Deserialize)]
struct ClientSecrets {
    client_id: String,
    client_secret: String,
    #[serde(default)]
    auth_uri: Option<String>,
    #[serde(default)]
    token_uri: Option<String>,
}

impl AuthConfig {
    /// Parse a Google `credentials.json` client secret file.
    ///
    /// Accepts both "installed" (desktop) and "web" client types.
    ///
    /// # Errors
    /// - `Error::Serialization` if the JSON is malformed
    /// - `Error::InvalidInput` if neither client type is present
    pub fn from_credentials_json(bytes: &[u8]) -> Result<Self> {
        let file: CredentialsFile = serde_json::from_slice(bytes)?;
        let secrets = file.installed.or(file.web).ok_or_else(|| {
            Error::InvalidInput(
                "credentials file has neither an 'installed' nor a 'web' client".to_string(),
            )
        })?;

        Ok(Self {
            client_id: secrets.client_id,
            client_secret: secrets.client_secret,
            auth_url: secrets
                .auth_uri
                .unwrap_or_else(|| GOOGLE_AUTH_URL.to_string()),
            token_url: secrets
                .token_uri
                .unwrap_or_else(|| GOOGLE_TOKEN_URL.to_string()),
            redirect_url: REDIRECT_URL.to_string(),
        })
    }

    /// Override the redirect URL.
    pub fn with_redirect_url(mut self, redirect_url: impl Into<String>) -> Self {
        self.redirect_url = redirect_url.into();
        self
    }
}

/// The three OAuth2 operations the backup service needs.
///
/// `AuthManager` talks to Google; tests substitute a fixed-code fake.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Generate the authorization URL for the operator to visit.
    ///
    /// Returns the URL and the CSRF state to verify on callback.
    fn authorization_url(&self) -> (String, String);

    /// Exchange an authorization code for tokens.
    async fn exchange_code(&self, code: &str) -> Result<Tokens>;

    /// Obtain a fresh access token.
    async fn refresh_token(&self, refresh_token: &str) -> Result<Tokens>;
}

type GoogleClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// OAuth2 authentication manager for Google Drive.
pub struct AuthManager {
    client: GoogleClient,
    http: reqwest::Client,
}

impl AuthManager {
    /// Create a new authentication manager.
    ///
    /// # Errors
    /// - `Error::InvalidInput` if any configured URL is malformed
    pub fn new(config: AuthConfig) -> Result<Self> {
        let client = BasicClient::new(ClientId::new(config.client_id))
            .set_client_secret(ClientSecret::new(config.client_secret))
            .set_auth_uri(
                AuthUrl::new(config.auth_url)
                    .map_err(|e| Error::InvalidInput(format!("Invalid auth URL: {}", e)))?,
            )
            .set_token_uri(
                TokenUrl::new(config.token_url)
                    .map_err(|e| Error::InvalidInput(format!("Invalid token URL: {}", e)))?,
            )
            .set_redirect_uri(
                RedirectUrl::new(config.redirect_url)
                    .map_err(|e| Error::InvalidInput(format!("Invalid redirect URL: {}", e)))?,
            );

        // Token endpoints must not be followed through redirects.
        let http = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { client, http })
    }

    fn tokens_from_response(
        access_token: String,
        refresh_token: String,
        expires_in: Option<std::time::Duration>,
    ) -> Tokens {
        let expires_in = expires_in.unwrap_or_else(|| std::time::Duration::from_secs(3600));
        let expires_at =
            Utc::now() + Duration::from_std(expires_in).unwrap_or_else(|_| Duration::hours(1));

        Tokens::new(access_token, refresh_token, expires_at)
    }
}

#[async_trait]
impl Authorizer for AuthManager {
    fn authorization_url(&self) -> (String, String) {
        let (auth_url, csrf_token) = self
            .client
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new(DRIVE_SCOPE.to_string()))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .url();

        (auth_url.to_string(), csrf_token.secret().clone())
    }

    /// Exchange an authorization code for tokens.
    ///
    /// # Errors
    /// - `Error::Authentication` for an invalid code or a failed request
    /// - `Error::Authentication` if Google returned no refresh token
    async fn exchange_code(&self, code: &str) -> Result<Tokens> {
        let token_result = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token exchange failed: {}", e)))?;

        let refresh_token = token_result
            .refresh_token()
            .ok_or_else(|| {
                Error::Authentication(
                    "No refresh token received. Ensure 'offline' access and 'consent' \
                     prompt were requested."
                        .to_string(),
                )
            })?
            .secret()
            .clone();

        Ok(Self::tokens_from_response(
            token_result.access_token().secret().clone(),
            refresh_token,
            token_result.expires_in(),
        ))
    }

    /// Refresh an access token using the refresh token.
    ///
    /// # Errors
    /// - `Error::Authentication` for a revoked refresh token or a failed request
    async fn refresh_token(&self, refresh_token: &str) -> Result<Tokens> {
        let token_result = self
            .client
            .exchange_refresh_token(&RefreshToken::new(refresh_token.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token refresh failed: {}", e)))?;

        // Refresh tokens may or may not be returned in refresh response
        let new_refresh_token = token_result
            .refresh_token()
            .map(|t| t.secret().clone())
            .unwrap_or_else(|| refresh_token.to_string());

        Ok(Self::tokens_from_response(
            token_result.access_token().secret().clone(),
            new_refresh_token,
            token_result.expires_in(),
        ))
    }
}

/// Token manager that automatically refreshes expired tokens.
///
/// When a store is attached, refreshed tokens are written back so the next
/// process start does not begin with a stale access token.
pub struct TokenManager {
    authorizer: Arc<dyn Authorizer>,
    tokens: RwLock<Tokens>,
    store: Option<TokenStore>,
}

impl TokenManager {
    /// Create a new token manager with initial tokens.
    pub fn new(authorizer: Arc<dyn Authorizer>, tokens: Tokens) -> Self {
        Self {
            authorizer,
            tokens: RwLock::new(tokens),
            store: None,
        }
    }

    /// Persist refreshed tokens to `store`.
    pub fn with_store(mut self, store: TokenStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Get a valid access token, refreshing if necessary.
    ///
    /// # Errors
    /// - `Error::Authentication` if the token expired and cannot be refreshed
    pub async fn get_access_token(&self) -> Result<String> {
        let tokens = self.tokens.read().await;

        if !tokens.is_expired() {
            return Ok(tokens.access_token.clone());
        }

        drop(tokens);

        let mut tokens = self.tokens.write().await;

        // Double-check after acquiring write lock
        if !tokens.is_expired() {
            return Ok(tokens.access_token.clone());
        }

        if !tokens.can_refresh() {
            return Err(Error::Authentication(
                "Access token expired and no refresh token is available; re-authorization required"
                    .to_string(),
            ));
        }

        info!("Refreshing expired access token");

        let new_tokens = self.authorizer.refresh_token(&tokens.refresh_token).await?;

        if let Some(store) = &self.store {
            if let Err(e) = store.save(&new_tokens).await {
                warn!("Failed to persist refreshed token: {}", e);
            }
        }

        *tokens = new_tokens;

        Ok(tokens.access_token.clone())
    }
}
