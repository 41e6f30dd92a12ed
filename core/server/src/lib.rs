//! HTTP trigger for driveback.
//!
//! Routes:
//! - `GET /backup` - upload the archive (create on first use, update after)
//! - `GET /callback` - OAuth2 redirect target
//! - `GET /authorize` - redirect to the pending authorization URL
//! - `GET /status` - backup state as JSON
//! - `GET /health` - liveness probe

pub mod config;
pub mod error;
pub mod handlers;
pub mod state;

pub use config::{ServerConfig, DEFAULT_BIND};
pub use error::ApiError;
pub use state::AppState;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use driveback_common::Result;

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/backup", get(handlers::backup))
        .route("/callback", get(handlers::callback))
        .route("/authorize", get(handlers::authorize))
        .route("/status", get(handlers::status))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve on `listener` until the state's shutdown token is cancelled.
pub async fn serve(listener: TcpListener, state: AppState) -> Result<()> {
    let shutdown = state.shutdown.clone();

    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {}", addr);
    }

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Server stopped");
    Ok(())
}
