mod analytics;
mod api;
mod config;
mod error;
mod fetcher;
mod refresh;
mod state;
mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::HealthState;
use crate::api::latency::PipelineLatency;
use crate::api::routes::{router, ApiState};
use crate::config::Config;
use crate::error::Result;
use crate::fetcher::NseClient;
use crate::refresh::{ChainRefresher, ControlMsg, RefreshContext};
use crate::state::ChainStore;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let client = Arc::new(NseClient::new(&cfg)?);
    let store = ChainStore::from_config(&cfg);
    let latency = Arc::new(PipelineLatency::new());
    let health = Arc::new(HealthState::new());

    let chain_list: Vec<String> = cfg.chains.iter().map(|k| k.to_string()).collect();
    info!(
        chains = %chain_list.join(","),
        interval_secs = cfg.refresh_interval_secs,
        instrument_type = %cfg.instrument_type,
        history_max_entries = cfg.history_max_entries,
        history_max_minutes = cfg.history_max_minutes,
        "Starting option-chain engine for {} chain(s) against {}",
        chain_list.len(),
        cfg.nse_base_url,
    );
    if cfg.nse_cookie.is_some() {
        info!("NSE_COOKIE set: sending it on every session alongside primed cookies");
    }

    // --- One refresher per chain; the first tick fires immediately ---
    let ctx = RefreshContext {
        source: Arc::clone(&client),
        store: Arc::clone(&store),
        latency: Arc::clone(&latency),
        health: Arc::clone(&health),
        instrument_type: cfg.instrument_type.clone(),
        interval: Duration::from_secs(cfg.refresh_interval_secs),
    };
    let mut refreshers = HashMap::new();
    let mut tasks = Vec::new();
    for key in &cfg.chains {
        let (handle, task) = ChainRefresher::spawn(key.clone(), ctx.clone());
        refreshers.insert(key.clone(), handle);
        tasks.push(task);
    }
    let refreshers = Arc::new(refreshers);

    // --- HTTP API server ---
    let api_state = ApiState {
        store: Arc::clone(&store),
        client: Arc::clone(&client),
        refreshers: Arc::clone(&refreshers),
        latency,
        health,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Shutdown: stop every refresher and wait for the loops to exit ---
    for handle in refreshers.values() {
        handle.send(ControlMsg::Shutdown);
    }
    for (joined, key) in futures_util::future::join_all(tasks).await.into_iter().zip(&cfg.chains) {
        if let Err(e) = joined {
            warn!(chain = %key, "Refresher task ended abnormally: {e}");
        }
    }
    info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
