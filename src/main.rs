mod analysis;
mod config;
mod db;
mod engine;
mod errors;
mod market;
mod payoff;
mod server;
mod state;
mod tabular;
#[cfg(test)]
mod testutil;

use crate::market::yahoo::YahooClient;
use crate::market::MarketDataProvider;
use crate::state::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("payoff desk starting");

    let cfg = match config::AppConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("config error: {e}");
            std::process::exit(1);
        }
    };

    let db_pool = match db::init_db(&cfg.data_dir) {
        Ok(d) => d,
        Err(e) => {
            tracing::error!("database init error: {e}");
            std::process::exit(1);
        }
    };

    let (engine_tx, engine_rx) = mpsc::channel::<EngineEvent>(256);
    let (db_tx, db_rx) = mpsc::channel::<DbCommand>(64);

    let provider: Arc<dyn MarketDataProvider> =
        Arc::new(YahooClient::new(&cfg.yahoo_base_url, cfg.http_timeout_secs));
    tracing::info!(base_url = %cfg.yahoo_base_url, "market data provider ready");

    let app_state = AppState::new(cfg.clone(), db_pool.clone(), provider, engine_tx.clone(), db_tx);

    // ── Spawn tasks ──

    // 1. DB writer (only task that writes the archive)
    let db_writer = tokio::spawn(db::run_db_writer(db_pool, db_rx));

    // 2. Engine (single owner of session + params)
    let engine = tokio::spawn(engine::run_engine(app_state.clone(), engine_rx));

    // 3. Axum HTTP + WS server
    let app = server::router(app_state);
    let addr = format!("0.0.0.0:{}", cfg.server_port);
    tracing::info!("server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("bind error: {e}");
            std::process::exit(1);
        });

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("signal handler error: {e}");
        }
        tracing::info!("ctrl-c received");
    };

    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(shutdown).await {
        tracing::error!("server error: {e}");
    }

    // The writer exits once every db_tx is dropped. Open websocket tasks may
    // still hold state, so its drain is bounded.
    let _ = engine_tx.send(EngineEvent::Shutdown).await;
    drop(engine_tx);
    let _ = engine.await;
    match tokio::time::timeout(Duration::from_secs(5), db_writer).await {
        Ok(_) => tracing::info!("db writer drained"),
        Err(_) => tracing::warn!("db writer still busy at exit, pending archives dropped"),
    }
    tracing::info!("payoff desk stopped");
}
