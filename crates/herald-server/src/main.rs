mod api;
mod auth;
mod config;
mod error;
mod qr;

#[cfg(test)]
mod tests;

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use herald_proto::{LoopbackEngine, WaTransport};
use herald_session::{HistoryController, Session};
use herald_store::Store;

use crate::api::AppState;
use crate::config::Config;

/// Grace period for in-flight HTTP requests on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,herald_server=debug")),
        )
        .init();

    info!("Starting Herald bridge v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env();
    info!(
        data_dir = %config.data_dir.display(),
        addr = %config.http_addr,
        "Loaded configuration"
    );

    // Any failure from here to the first bind is fatal: exit nonzero.
    let api_key = auth::load_or_create_api_key(&config.data_dir)?;
    let store = Arc::new(Store::open(&config.data_dir)?);
    info!("Database initialized");

    let (engine, events) = LoopbackEngine::open(&config.data_dir)?;
    let transport: Arc<dyn WaTransport> = engine;

    let history = HistoryController::new(transport.clone(), store.clone());
    let session = Session::new(transport.clone(), events, store.clone(), history.clone());
    session.connect().await?;
    info!("WhatsApp client connected");

    let state = AppState {
        session: session.clone(),
        store,
        history,
        transport,
        api_key: Arc::new(api_key),
    };
    let app = api::build_router(state);

    let listener = tokio::net::TcpListener::bind(config.http_addr).await?;
    info!(addr = %config.http_addr, "HTTP server listening");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    info!("Received shutdown signal");

    // Stop accepting requests and drain within the grace period.
    let _ = shutdown_tx.send(());
    match tokio::time::timeout(SHUTDOWN_GRACE, server).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => warn!(error = %e, "HTTP server error during shutdown"),
        Ok(Err(e)) => warn!(error = %e, "HTTP server task failed"),
        Err(_) => warn!("grace period elapsed with requests still in flight"),
    }

    session.disconnect().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
