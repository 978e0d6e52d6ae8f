//! # mshb-server
//!
//! GIPHY proxy function. Clients search and browse GIFs through it so the
//! API key never ships with the desktop app.

mod api;
mod config;
mod error;
mod giphy;
mod rate_limit;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::giphy::GiphyClient;
use crate::rate_limit::RateLimiter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,mshb_server=debug")))
        .init();

    info!("Starting MSHB GIPHY proxy v{}", env!("CARGO_PKG_VERSION"));

    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    let giphy = match &config.giphy_api_key {
        Some(key) => Some(Arc::new(GiphyClient::new(&config.giphy_base_url, key)?)),
        None => {
            warn!("GIPHY_API_KEY not set, GIF routes will answer 503");
            None
        }
    };

    let rate_limiter = RateLimiter::new(config.rate_limit_per_sec, config.rate_limit_burst);

    // Evict buckets idle for more than 10 minutes, every 5 minutes.
    let rl = rate_limiter.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(300));
        loop {
            interval.tick().await;
            rl.purge_idle(Duration::from_secs(600)).await;
        }
    });

    let app = api::build_router(AppState { giphy, rate_limiter });

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "HTTP server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutting down");
    })
    .await?;

    Ok(())
}
