//! `jd-decoder serve`: run the HTTP API.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::info;

use jd_decoder::api::{start_server, AppState};
use jd_decoder::health::start_periodic_usage_flush;
use jd_decoder::{Config, Decoder};

pub(crate) async fn cmd_serve(bind: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = Config::load().with_context(|| "Failed to load configuration")?;
    if let Some(bind) = bind {
        config.server.bind = bind;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    let decoder = Decoder::from_config(&config).with_context(|| "Failed to build decoder")?;
    info!(
        model = decoder.model(),
        cache_max_entries = config.cache.max_entries,
        cache_ttl_secs = config.cache.ttl_secs,
        "Starting JD Decoder"
    );

    let state = AppState::new(Arc::new(decoder));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let flush = start_periodic_usage_flush(Arc::clone(state.metrics()), shutdown_rx);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    };
    let served = start_server(&config.server, state, shutdown)
        .await
        .map_err(|e| anyhow::anyhow!("API server error: {e}"));

    let _ = shutdown_tx.send(true);
    let _ = flush.await;
    served
}
