//! seal-push: watch Nostr relays and push a notification per gift wrap.
//!
//! Configuration comes from `SEAL_PUSH_CONFIG` (TOML) and the environment;
//! see [`BridgeConfig`]. Log level follows `RUST_LOG` (default `info`).

use anyhow::{Context, Result};
use nostr_client::WebSocketConnector;
use seal_push::{Bridge, BridgeConfig, Database, NtfyNotifier, spawn_purge_task};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = BridgeConfig::load().context("loading configuration")?;
    let database = Arc::new(
        Database::open(&config.database)
            .with_context(|| format!("opening database at {:?}", config.database.path))?,
    );
    let notifier = Arc::new(
        NtfyNotifier::new(config.delivery.clone()).context("building ntfy client")?,
    );

    info!(
        "Starting seal-push (ntfy: {}, default relays: {})",
        config.delivery.server,
        config.relays.defaults.join(", ")
    );

    let retention = config.retention();
    let purge_interval = config.purge_interval();
    let grace = config.shutdown_grace();

    let bridge = Bridge::new(
        config,
        database.clone(),
        database.clone(),
        Arc::new(WebSocketConnector),
        notifier,
    );
    bridge.restore().await.context("restoring recipients")?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let purge = spawn_purge_task(database.clone(), retention, purge_interval, stop_rx);

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown signal received");

    let _ = stop_tx.send(true);
    bridge.shutdown(grace).await;
    let _ = purge.await;

    let stats = database.stats().await?;
    info!(
        "Stopped with {} recipient(s) and {} admitted event(s) stored",
        stats.recipients, stats.admitted_events
    );
    Ok(())
}
