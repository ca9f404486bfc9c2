#![forbid(unsafe_code)]

//! Action log daemon: keeps a supervised store connection and serves the API.

use std::sync::Arc;

use actionlog_daemon::{http, Cli, SurrealStore, Supervisor};
use clap::Parser;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&cli.log))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::debug!(config = ?cli, "configuration loaded");

    let store = Arc::new(SurrealStore::new(
        &cli.db_url,
        &cli.ns,
        &cli.db,
        cli.health_interval(),
    ));
    let sup = Supervisor::new(store, cli.supervisor_config());

    // A failed first attempt schedules its own retry; the API serves either way.
    sup.connect().await;

    let app = http::router(sup)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    tracing::info!(listen = %cli.listen, "daemon starting");
    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
