//! status-dashboard server binary
//!
use std::time::Duration;

use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use status_dashboard::api;
use status_dashboard::config::Config;
use status_dashboard::db::Store;
use status_dashboard::reconciler::StatusReconciler;
use status_dashboard::types::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.tracing_filter()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting status-dashboard");

    let store = Store::open(&config.db)?;
    store.migrate()?;
    let server_addr = config.get_socket_addr()?;

    let state = AppState::new(config, store);
    let reconciler = StatusReconciler::new(state.store.clone());
    reconciler.start();

    let app = api::build_router(state);

    tracing::debug!("listening on {}", server_addr);
    axum::Server::bind(&server_addr)
        .http1_header_read_timeout(Duration::from_secs(3))
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    reconciler.shutdown();
    tracing::info!("Stopped status-dashboard");
    Ok(())
}

/// Shutdown handler for the application
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("signal received, starting graceful shutdown");
}
