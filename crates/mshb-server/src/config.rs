//! Server configuration loaded from environment variables.
//!
//! Everything has a default so the proxy starts locally without setup. It
//! only answers GIPHY requests once `GIPHY_API_KEY` is set.

use std::net::SocketAddr;

use mshb_shared::constants::{DEFAULT_HTTP_PORT, GIPHY_BASE_URL};

#[derive(Clone)]
pub struct ServerConfig {
    /// Env: `HTTP_ADDR`, default `0.0.0.0:8080`.
    pub http_addr: SocketAddr,

    /// Env: `GIPHY_API_KEY`. Never sent to clients.
    pub giphy_api_key: Option<String>,

    /// Env: `GIPHY_BASE_URL`.
    pub giphy_base_url: String,

    /// Sustained requests per second per IP. Env: `RATE_LIMIT_PER_SEC`.
    pub rate_limit_per_sec: f64,

    /// Burst size per IP. Env: `RATE_LIMIT_BURST`.
    pub rate_limit_burst: f64,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("http_addr", &self.http_addr)
            .field("giphy_api_key", &self.giphy_api_key.as_ref().map(|_| "<set>"))
            .field("giphy_base_url", &self.giphy_base_url)
            .field("rate_limit_per_sec", &self.rate_limit_per_sec)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: ([0, 0, 0, 0], DEFAULT_HTTP_PORT).into(),
            giphy_api_key: None,
            giphy_base_url: GIPHY_BASE_URL.to_string(),
            rate_limit_per_sec: 5.0,
            rate_limit_burst: 20.0,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(addr) = lookup("HTTP_ADDR") {
            match addr.parse::<SocketAddr>() {
                Ok(parsed) => config.http_addr = parsed,
                Err(_) => tracing::warn!(value = %addr, "Invalid HTTP_ADDR, using default"),
            }
        }

        config.giphy_api_key = lookup("GIPHY_API_KEY").filter(|k| !k.trim().is_empty());

        if let Some(url) = lookup("GIPHY_BASE_URL") {
            config.giphy_base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(rate) = lookup("RATE_LIMIT_PER_SEC").and_then(|v| v.parse::<f64>().ok()) {
            if rate > 0.0 {
                config.rate_limit_per_sec = rate;
            }
        }
        if let Some(burst) = lookup("RATE_LIMIT_BURST").and_then(|v| v.parse::<f64>().ok()) {
            if burst >= 1.0 {
                config.rate_limit_burst = burst;
            }
        }

        config
    }
}
