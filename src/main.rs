use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tracing::info;
use tracing_subscriber::EnvFilter;

use auction_hall::config;
use auction_hall::db::Database;
use auction_hall::engine::{self, Engine, EngineHandle};
use auction_hall::ws_server;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = config::load_config().context("failed to load configuration")?;
    info!(
        port = config.ws_port,
        db = %config.db_path,
        "starting auction server"
    );

    let db = Arc::new(Database::open(&config.db_path)?);
    let released = db
        .recover(config.auction.initial_budget)
        .context("startup recovery failed")?;
    if released > 0 {
        info!(released, "released players stranded mid-round by a previous run");
    }

    let (event_tx, _) = broadcast::channel(256);
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (timer_tx, timer_rx) = mpsc::channel(64);

    let engine = Engine::new(
        config.clone(),
        Arc::clone(&db),
        event_tx.clone(),
        timer_tx,
    );
    let handle = EngineHandle::new(cmd_tx, event_tx);

    let engine_task = tokio::spawn(engine::run(engine, cmd_rx, timer_rx));
    let listener = ws_server::bind(config.ws_port).await?;
    let server_task = tokio::spawn(ws_server::run(listener, handle));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
        }
        result = server_task => {
            result.context("websocket server task failed")??;
        }
        _ = engine_task => {}
    }

    Ok(())
}
