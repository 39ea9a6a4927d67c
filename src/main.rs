use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use ssehub::api::{self, AppState};
use ssehub::config::Config;
use ssehub::hub::{self, Hub};
use ssehub::registry::Registry;
use ssehub::shutdown::ShutdownCoordinator;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ssehub=debug,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(?config, "ssehub starting");

    let registry = Arc::new(Registry::new());
    let hub = Hub::with_options(registry, config.hub_options());
    let shutdown = ShutdownCoordinator::new();

    let heartbeat = hub::spawn_heartbeat(hub.clone(), config.heartbeat_interval(), shutdown.signal());

    let state = AppState {
        hub,
        limits: config.limits(),
        shutdown: shutdown.clone(),
        max_body_bytes: config.max_body_bytes,
    };

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("failed to bind {}", config.bind))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("server error")?;

    if let Err(e) = heartbeat.await {
        tracing::warn!("heartbeat task ended abnormally: {e}");
    }
    tracing::info!("ssehub stopped");
    Ok(())
}

async fn shutdown_signal(shutdown: ShutdownCoordinator) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!(open = shutdown.open_count(), "shutdown requested");
    shutdown.shutdown();
    if tokio::time::timeout(SHUTDOWN_GRACE, shutdown.wait_for_all_closed())
        .await
        .is_err()
    {
        tracing::warn!(open = shutdown.open_count(), "event streams still open after grace period");
    }
}
