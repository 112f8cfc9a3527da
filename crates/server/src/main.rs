use std::{net::SocketAddr, sync::Arc};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod app_state;
mod config;
mod reactor;

use app_state::AppState;
use config::{load_settings, log_filter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_filter(|key| std::env::var(key).ok())))
        .init();
    let settings = load_settings();

    let state = AppState::new(&settings);
    let app = api::build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(
        %addr,
        processing_delay_ms = settings.processing_delay_ms,
        default_await_timeout_secs = settings.default_await_timeout_secs,
        "server listening"
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "could not listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
