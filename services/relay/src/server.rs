//! Process lifecycle: bind, serve until signaled, drain.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::ProxyConfig;
use crate::proxy::Listener;

/// Serve until Ctrl-C or SIGTERM, then drain in-flight sessions.
///
/// Logging must already be initialized. A bind failure is returned.
pub async fn serve(config: ProxyConfig) -> Result<()> {
    let config = Arc::new(config);

    info!(
        listen_addr = %config.listen_addr(),
        backend_addr = %config.backend_addr(),
        http_response_code = config.http_response_code,
        websocket_enabled = config.websocket_enabled,
        max_connections = config.max_connections,
        "Starting sshgate"
    );

    let listener = Listener::bind(Arc::clone(&config))
        .with_context(|| format!("Failed to bind {}", config.listen_addr()))?;
    let stats = listener.stats();
    let connections = listener.active_connections();

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut listener_handle = tokio::spawn(listener.run(shutdown_rx));

    // Wait for shutdown signal
    let finished = tokio::select! {
        _ = shutdown_signal() => {
            info!("Received shutdown signal");
            None
        }
        result = &mut listener_handle => Some(result),
    };

    // Stop accepting; the listening socket closes when the task returns
    shutdown_tx.send_replace(true);
    let listener_result = match finished {
        Some(result) => result,
        None => listener_handle.await,
    };
    let accept_error = match listener_result {
        Ok(Ok(())) => None,
        Ok(Err(e)) => {
            error!(error = %e, "Listener failed");
            Some(anyhow::Error::new(e).context("Accept loop failed"))
        }
        Err(e) => {
            error!(error = %e, "Listener task panicked");
            Some(anyhow::Error::new(e).context("Listener task panicked"))
        }
    };

    let in_flight = connections.count();
    if in_flight > 0 {
        info!(
            sessions = in_flight,
            grace_secs = config.shutdown_grace_secs,
            "Waiting for in-flight sessions"
        );
        if !connections.drain(config.shutdown_grace()).await {
            warn!(
                sessions = connections.count(),
                "Grace period elapsed with sessions still open"
            );
        }
    }

    let snapshot = stats.snapshot();
    info!(
        connections_accepted = snapshot.connections_accepted,
        connections_rejected = snapshot.connections_rejected,
        relays_closed = snapshot.relays_closed,
        bytes_to_backend = snapshot.bytes_to_backend,
        bytes_from_backend = snapshot.bytes_from_backend,
        "sshgate shutdown complete"
    );

    match accept_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(e) => {
            warn!(error = %e, "Failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
