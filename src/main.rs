use anyhow::Result;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

mod config;
mod dashboard;
mod models;
mod scoreboard;
mod tracker;

use config::Config;
use dashboard::AppState;
use scoreboard::{CrexScraper, TitleSource};
use tracker::{spawn_auto_update, MatchTracker};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise tracing / logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse();
    config.validate()?;

    let source: Arc<dyn TitleSource> =
        Arc::new(CrexScraper::new(&config.user_agent, config.fetch_timeout())?);
    info!("Scoreboard source: {}", source.name());

    let tracker = Arc::new(MatchTracker::new(source, config.tracker_settings()));

    if let Some(url) = &config.match_url {
        // A failed first fetch is not fatal; the URL stays tracked and the
        // background loop retries it.
        if let Err(e) = tracker.set_match_url(url.trim()).await {
            warn!("Initial fetch of {} failed: {}", url, e);
        }
    } else {
        info!("No match URL configured yet; set one via POST /api/set-url");
    }

    let auto_update = spawn_auto_update(Arc::clone(&tracker));
    info!(
        "Auto-update {} (every {}s, {}-over format)",
        if tracker.auto_update_enabled() { "enabled" } else { "disabled" },
        config.update_interval_secs,
        config.format_overs
    );

    let app = dashboard::router(AppState {
        tracker: Arc::clone(&tracker),
        keepalive: config.keepalive(),
    });
    let addr: SocketAddr = config.listen_addr.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Control page:   http://{}/", addr);
    info!("Score API:      http://{}/api/current-score", addr);
    info!("Event stream:   http://{}/events", addr);

    // Run server (blocks until Ctrl-C)
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    auto_update.abort();
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
