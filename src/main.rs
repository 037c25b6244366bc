// src/main.rs

use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// --- Module Declarations ---
mod config;
mod dispatcher;
mod error;
mod store;
mod twitch;

// --- Imports ---
use crate::config::{IrcConfig, load_settings};
use crate::dispatcher::Dispatcher;
use crate::error::Result as AppResult;
use crate::store::build_store;
use crate::twitch::{
    ChannelRegistry, HelixClient, IrcTransport, StreamLookup, TokenProvider, TwitchError,
};

#[tokio::main]
async fn main() -> AppResult<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{}=info", env!("CARGO_PKG_NAME")).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = load_settings()?;
    tracing::info!("Configuration loaded: {:?}", settings);

    let http = reqwest::Client::new();
    let tokens = TokenProvider::new(Arc::new(settings.twitch.clone()), http.clone()).await?;
    let lookup: Arc<dyn StreamLookup> = Arc::new(HelixClient::new(
        http,
        settings.twitch.api_base_url.clone(),
        tokens,
    ));
    let store = build_store(&settings.store);

    let transport = IrcTransport::new(
        settings.irc.server_addr(),
        settings.irc.transport_options(),
    );
    transport
        .connect(&settings.irc.nick, &settings.irc.token)
        .await?;

    let registry = Arc::new(ChannelRegistry::new(
        transport.clone(),
        Arc::clone(&lookup),
        settings.bot.timings(),
    ));
    registry.register(&settings.irc.home_channel()).await;
    match store.list_registered_channels().await {
        Ok(channels) => {
            for channel in channels {
                registry.register(&channel.name).await;
            }
        }
        Err(e) => tracing::error!(error = %e, "Could not load stored channels, continuing with home channel only"),
    }
    tracing::info!(channels = ?registry.channels().await, "Channels registered");

    let dispatcher = Dispatcher::new(
        &settings.irc.nick,
        &settings.bot.alias,
        Arc::clone(&registry),
        store,
        lookup,
    )?;

    tokio::select! {
        _ = run_read_loop(&transport, &dispatcher, &settings.irc) => {}
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        }
    }

    registry.shutdown().await;
    if let Err(e) = transport.disconnect().await {
        tracing::warn!(error = %e, "Error while closing chat connection");
    }
    tracing::info!("Shut down cleanly");
    Ok(())
}

async fn run_read_loop(transport: &IrcTransport, dispatcher: &Dispatcher, irc: &IrcConfig) {
    loop {
        match transport.read().await {
            Ok(event) => dispatcher.dispatch(&event).await,
            Err(TwitchError::Parse(e)) => {
                tracing::warn!(error = %e, "[IRC] Dropping malformed line");
            }
            Err(e) => {
                tracing::warn!(error = %e, "[IRC] Connection lost");
                reconnect_with_backoff(transport, irc).await;
            }
        }
    }
}

async fn reconnect_with_backoff(transport: &IrcTransport, irc: &IrcConfig) {
    let base = Duration::from_secs(irc.reconnect_base_secs);
    let max = Duration::from_secs(irc.reconnect_max_secs);
    let mut attempt: u32 = 0;

    loop {
        let delay = reconnect_delay(base, max, attempt);
        tracing::info!(attempt, retry_in = ?delay, "[IRC] Scheduling reconnect");
        sleep(delay).await;

        match transport.connect(&irc.nick, &irc.token).await {
            Ok(()) => {
                tracing::info!(attempt, "[IRC] Reconnected");
                return;
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "[IRC] Reconnect failed");
                attempt = attempt.saturating_add(1);
            }
        }
    }
}

/// Doubles from `base` per failed attempt, capped at `max`.
fn reconnect_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.min(16)))
        .min(max)
}
