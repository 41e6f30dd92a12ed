//! Server configuration.

use std::net::SocketAddr;

/// Default listen address.
pub const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on.
    pub bind_addr: SocketAddr,
    /// Where the OAuth2 provider sends the operator back to. Defaults to
    /// `/callback` on localhost at the bound port.
    pub redirect_url: Option<String>,
}

impl ServerConfig {
    /// Listen on `bind_addr` with the default redirect URL.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            redirect_url: None,
        }
    }

    /// Override the OAuth2 redirect URL.
    pub fn with_redirect_url(mut self, redirect_url: impl Into<String>) -> Self {
        self.redirect_url = Some(redirect_url.into());
        self
    }

    /// The redirect URL to register with the OAuth2 client.
    pub fn redirect_url(&self) -> String {
        self.redirect_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}/callback", self.bind_addr.port()))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([0, 0, 0, 0], 8080)))
    }
}
