//! # mshb-client
//!
//! Desktop client core. The UI calls into [`commands`] with a
//! [`state::SharedState`] and listens for [`events::ClientEvent`]s.

pub mod commands;
pub mod config;
pub mod desktop;
pub mod error;
pub mod events;
pub mod platform;
pub mod settings;
pub mod state;

use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::ClientConfig;
use crate::desktop::deeplink::DeepLink;
use crate::desktop::single_instance::{self, Instance};
use crate::desktop::squirrel::{self, SquirrelEvent};
use crate::desktop::updater;
use crate::events::{emit_event, ClientEvent};
use crate::platform::Platform;
use crate::state::{default_media_source, AppState};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("mshb_client_lib=debug,mshb_media=info,mshb_realtime=info,mshb_store=info,warn")
    });

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}

fn announce_deep_link(events: &broadcast::Sender<ClientEvent>, args: &[String]) {
    if let Some(link) = DeepLink::from_args(args) {
        info!(?link, "Deep link received");
        emit_event(events, ClientEvent::DeepLink(link));
    }
}

pub async fn run() -> anyhow::Result<()> {
    init_tracing();
    let args: Vec<String> = std::env::args().collect();

    if let Some(event) = SquirrelEvent::from_args(&args) {
        info!(?event, "Installer hook");
        squirrel::perform(event.action(), &std::env::current_exe()?)?;
        if event.should_exit() {
            return Ok(());
        }
    }

    let config = ClientConfig::from_env();
    let Instance::Primary {
        mut forwarded,
        listener,
        ..
    } = single_instance::acquire(config.instance_port, &args).await?
    else {
        return Ok(());
    };

    info!("Starting MSHB v{}", updater::current_version());

    let platform = Platform::open(&config).await?;
    let update_feed = config.update_feed.clone();
    let app = AppState::new(config, platform, default_media_source());
    let events = app.events.clone();
    let state = app.into_shared();

    announce_deep_link(&events, &args);
    let update_checker = updater::spawn_update_checker(update_feed, events.clone());

    loop {
        tokio::select! {
            Some(args) = forwarded.recv() => announce_deep_link(&events, &args),
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Shutting down");
    if let Err(e) = commands::auth::sign_out(&state).await {
        warn!(error = %e, "Sign out during shutdown failed");
    }
    update_checker.abort();
    listener.abort();
    Ok(())
}
