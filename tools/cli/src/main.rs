//! driveback - HTTP-triggered Google Drive backup.
//!
//! Serves `GET /backup`, which uploads a local zip archive to Google Drive:
//! the first call creates the remote file, later calls update it in place.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use driveback_backup::{Authenticator, BackupConfig, BackupEngine, RetryConfig, StateStore};
use driveback_server::{serve, AppState, ServerConfig, DEFAULT_BIND};
use driveback_storage::{
    create_default_registry, AuthConfig, AuthManager, Authorizer, ObjectSpec, TokenStore,
};

#[derive(Parser)]
#[command(name = "driveback")]
#[command(about = "driveback - Back up a zip archive to Google Drive on HTTP request")]
#[command(version)]
struct Cli {
    /// OAuth2 client secret file downloaded from the Google Cloud console.
    #[arg(long, env = "DRIVEBACK_CREDENTIALS", default_value = "credentials.json")]
    credentials: PathBuf,

    /// Where the OAuth2 token is cached between runs.
    #[arg(long, env = "DRIVEBACK_TOKEN", default_value = "token.json")]
    token: PathBuf,

    /// Local archive to upload.
    #[arg(long, env = "DRIVEBACK_ARCHIVE", default_value = "folder.zip")]
    archive: PathBuf,

    /// Name of the remote file when it is first created.
    #[arg(long, env = "DRIVEBACK_REMOTE_NAME", default_value = "test_folder.zip")]
    remote_name: String,

    /// Drive folder to create the remote file in.
    #[arg(long, env = "DRIVEBACK_FOLDER_ID")]
    folder_id: Option<String>,

    /// Existing remote file to update instead of creating a new one.
    #[arg(long, env = "DRIVEBACK_FILE_ID")]
    file_id: Option<String>,

    /// Persist the remote file id here so restarts keep updating the same
    /// file. Takes precedence over --file-id once written.
    #[arg(long, env = "DRIVEBACK_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, env = "DRIVEBACK_BIND", default_value = DEFAULT_BIND)]
    bind: SocketAddr,

    /// OAuth2 redirect URL [default: http://localhost:<port>/callback].
    #[arg(long, env = "DRIVEBACK_REDIRECT_URL")]
    redirect_url: Option<String>,

    /// Remote store: "gdrive", or "memory" for a dry run.
    #[arg(long, env = "DRIVEBACK_PROVIDER", default_value = "gdrive")]
    provider: String,

    /// Upper bound on one backup, in seconds.
    #[arg(long, env = "DRIVEBACK_UPLOAD_TIMEOUT", default_value_t = 600)]
    upload_timeout: u64,

    /// Retries for a failed update.
    #[arg(long, env = "DRIVEBACK_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Open the authorization URL in a browser when no token is cached.
    #[arg(long, env = "DRIVEBACK_OPEN_BROWSER")]
    open_browser: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(cli.verbose)?;

    let mut server_config = ServerConfig::new(cli.bind);
    if let Some(redirect_url) = &cli.redirect_url {
        server_config = server_config.with_redirect_url(redirect_url.clone());
    }

    let auth = authenticate(&cli, &server_config).await?;

    let mut object = ObjectSpec::zip(cli.remote_name.clone());
    if let Some(folder_id) = &cli.folder_id {
        object = object.with_parent(folder_id.clone());
    }

    let config = BackupConfig {
        archive_path: cli.archive.clone(),
        object,
        retry: RetryConfig::new(cli.max_retries),
        timeout: Duration::from_secs(cli.upload_timeout),
    };
    let state_store = cli.state_file.clone().map(StateStore::new);
    let engine = BackupEngine::restore(config, state_store, cli.file_id.clone())
        .await
        .context("Failed to load backup state")?;

    let state = AppState::new(Arc::new(engine), Arc::new(auth));

    let listener = TcpListener::bind(server_config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", server_config.bind_addr))?;

    let shutdown = state.shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutting down");
                shutdown.cancel();
            }
            Err(e) => warn!("Unable to listen for Ctrl-C: {}", e),
        }
    });

    serve(listener, state).await?;

    Ok(())
}

fn init_logging(verbose: bool) -> Result<()> {
    let default_directives = if verbose {
        "driveback=debug,tower_http=debug"
    } else {
        "driveback=info,tower_http=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .try_init()?;

    Ok(())
}

/// Load the OAuth2 client and open the authorization gate.
async fn authenticate(cli: &Cli, server_config: &ServerConfig) -> Result<Authenticator> {
    let credentials = tokio::fs::read(&cli.credentials)
        .await
        .with_context(|| {
            format!(
                "Unable to read client secret file {}",
                cli.credentials.display()
            )
        })?;

    let auth_config = AuthConfig::from_credentials_json(&credentials)
        .context("Unable to parse client secret file to config")?
        .with_redirect_url(server_config.redirect_url());
    let authorizer: Arc<dyn Authorizer> = Arc::new(AuthManager::new(auth_config)?);

    let auth = Authenticator::start(
        authorizer,
        TokenStore::new(&cli.token),
        create_default_registry(),
        cli.provider.as_str(),
    )
    .await
    .context("Failed to initialize authorization")?;

    if cli.open_browser {
        if let Some(url) = auth.authorization_url().await {
            if let Err(e) = open::that(&url) {
                warn!("Failed to open browser: {}", e);
            }
        }
    }

    Ok(auth)
}
