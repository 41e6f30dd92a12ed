//! Common test utilities for E2E tests

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use driveback_backup::{Authenticator, BackupConfig, BackupEngine, RetryConfig};
use driveback_common::{Error, Result};
use driveback_server::{serve, AppState};
use driveback_storage::{
    Authorizer, MemoryRemote, ProviderRegistry, RemoteStore, TokenManager, TokenStore, Tokens,
};

pub const CODE: &str = "4/test-code";
pub const CSRF_STATE: &str = "csrf-test";

/// Authorizer that accepts exactly one code.
pub struct FixedAuthorizer;

#[async_trait]
impl Authorizer for FixedAuthorizer {
    fn authorization_url(&self) -> (String, String) {
        (
            format!("https://accounts.example/o/oauth2/auth?state={}", CSRF_STATE),
            CSRF_STATE.to_string(),
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<Tokens> {
        if code == CODE {
            Ok(Tokens::new(
                "access-token",
                "refresh-token",
                Utc::now() + ChronoDuration::hours(1),
            ))
        } else {
            Err(Error::Authentication("invalid_grant".to_string()))
        }
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<Tokens> {
        Ok(Tokens::new(
            "refreshed-token",
            refresh_token,
            Utc::now() + ChronoDuration::hours(1),
        ))
    }
}

/// Knobs for [`TestServer::start`].
pub struct TestOptions {
    /// Write a token file before startup.
    pub authorized: bool,
    /// Simulated transfer time of the memory remote.
    pub remote_delay: Option<Duration>,
    /// Upload timeout of the engine.
    pub timeout: Duration,
}

impl Default for TestOptions {
    fn default() -> Self {
        Self {
            authorized: true,
            remote_delay: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Test server instance
pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub remote: Arc<MemoryRemote>,
    pub client: reqwest::Client,
    pub handle: JoinHandle<Result<()>>,
    pub temp_dir: TempDir,
}

impl TestServer {
    /// Start an authorized server with default options.
    pub async fn new() -> Self {
        Self::start(TestOptions::default()).await
    }

    /// Start a server backed by a shared memory remote.
    pub async fn start(options: TestOptions) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("folder.zip");
        tokio::fs::write(&archive_path, b"PK\x03\x04 test archive")
            .await
            .unwrap();

        let token_store = TokenStore::new(temp_dir.path().join("token.json"));
        if options.authorized {
            token_store
                .save(&Tokens::new(
                    "stored-token",
                    "stored-refresh",
                    Utc::now() + ChronoDuration::hours(1),
                ))
                .await
                .unwrap();
        }

        let remote = Arc::new(match options.remote_delay {
            Some(delay) => MemoryRemote::new().with_delay(delay),
            None => MemoryRemote::new(),
        });

        let mut registry = ProviderRegistry::new();
        let shared = remote.clone();
        registry
            .register(
                "memory",
                Box::new(move |_token_manager: Arc<TokenManager>| {
                    let store: Arc<dyn RemoteStore> = shared.clone();
                    Ok(store)
                }),
            )
            .unwrap();

        let auth = Authenticator::start(Arc::new(FixedAuthorizer), token_store, registry, "memory")
            .await
            .unwrap();

        let engine = BackupEngine::new(BackupConfig {
            archive_path,
            retry: RetryConfig::new(2)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
            timeout: options.timeout,
            ..BackupConfig::default()
        });

        let state = AppState::new(Arc::new(engine), Arc::new(auth));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();

        // Bind to random port
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(serve(listener, state.clone()));

        Self {
            addr,
            state,
            remote,
            client,
            handle,
            temp_dir,
        }
    }

    /// Get base URL for API requests
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    pub fn archive_path(&self) -> PathBuf {
        self.temp_dir.path().join("folder.zip")
    }

    pub fn token_path(&self) -> PathBuf {
        self.temp_dir.path().join("token.json")
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    pub async fn get_json(&self, path: &str) -> (reqwest::StatusCode, serde_json::Value) {
        let response = self.get(path).await;
        let status = response.status();
        (status, response.json().await.unwrap())
    }
}
