//! HTTP server lifecycle: bind, serve, graceful shutdown

use rivalscan_common::{Error, Result};
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{create_router, AppState};
use crate::config::ServerConfig;

/// How often expired cache entries are dropped
const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(300);

/// Serve the API until a shutdown signal arrives, then cancel running scans
pub async fn run(config: &ServerConfig, state: AppState) -> Result<()> {
    let addr = config.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| Error::Internal(format!("Failed to bind to {}: {}", addr, e)))?;
    info!("Starting HTTP server on {}", addr);

    let stop = CancellationToken::new();
    let janitor = spawn_cache_janitor(state.clone(), stop.clone());

    let orchestrator = state.orchestrator.clone();
    let app = create_router(state);
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    stop.cancel();
    if let Err(e) = janitor.await {
        error!("Cache janitor task failed: {}", e);
    }
    info!("Cancelling running scans");
    orchestrator.shutdown().await;

    served.map_err(|e| Error::Internal(format!("Server error: {}", e)))
}

fn spawn_cache_janitor(state: AppState, stop: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(CACHE_PURGE_INTERVAL);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                _ = ticker.tick() => {
                    let purged = state.orchestrator.cache().purge_expired();
                    debug!(purged, "Purged expired cache entries");
                }
            }
        }
    })
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
