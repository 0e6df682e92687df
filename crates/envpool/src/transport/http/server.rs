//! HTTP server implementation.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

use crate::service::PoolService;

use super::routes::routes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
        }
    }
}

/// Why the server stopped accepting connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    Requested,
}

/// Serve the pool API until SIGINT, SIGTERM or `POST /shutdown`.
pub async fn serve(config: ServerConfig, service: Arc<PoolService>) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Pool API listening");

    let shutdown_rx = service.shutdown_rx();
    axum::serve(listener, routes(service))
        .with_graceful_shutdown(async move {
            let reason = shutdown_reason(shutdown_rx).await;
            info!(?reason, "Draining connections");
        })
        .await?;

    info!("Pool API stopped");
    Ok(())
}

async fn shutdown_reason(shutdown_rx: watch::Receiver<bool>) -> ShutdownReason {
    tokio::select! {
        reason = os_signal() => reason,
        () = requested(shutdown_rx) => ShutdownReason::Requested,
    }
}

/// Resolves once the service flag flips; never if the sender is gone.
async fn requested(mut shutdown_rx: watch::Receiver<bool>) {
    let sender_gone = shutdown_rx.wait_for(|stop| *stop).await.is_err();
    if sender_gone {
        std::future::pending::<()>().await;
    }
}

#[cfg(unix)]
async fn os_signal() -> ShutdownReason {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => Some(sigterm),
        Err(e) => {
            tracing::error!(error = %e, "SIGTERM handler unavailable");
            None
        }
    };
    let terminate = async {
        match sigterm.as_mut() {
            Some(sigterm) => sigterm.recv().await,
            None => std::future::pending().await,
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => ShutdownReason::Interrupt,
        _ = terminate => ShutdownReason::Terminate,
    }
}

#[cfg(not(unix))]
async fn os_signal() -> ShutdownReason {
    let _ = tokio::signal::ctrl_c().await;
    ShutdownReason::Interrupt
}
