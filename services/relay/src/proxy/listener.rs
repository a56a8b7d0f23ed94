//! TCP listener and connection handling.
//!
//! Accepts connections, sniffs the protocol, runs the matching handshake
//! and relays established sessions to the backend.
//!
//! - One task per accepted connection, instrumented with a `connection` span
//! - Connection ceiling enforced with a semaphore; excess sockets are dropped
//! - Stopping the accept loop leaves in-flight sessions running; use
//!   [`ActiveConnections::drain`] to wait for them

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sshgate_wire::Protocol;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, warn, Instrument};

use super::backend::BackendConnector;
use super::error::Rejection;
use super::handshake::{HandshakeResult, Handshaker};
use super::relay::RelayPair;
use super::sniff::{SniffResult, Sniffer};
use crate::config::ProxyConfig;

/// Statistics for a listener.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Connections currently being handled.
    pub connections_active: AtomicU64,
    /// Total connections closed.
    pub connections_closed: AtomicU64,
    /// Connections rejected due to the ceiling.
    pub connections_rejected: AtomicU64,
    /// Connections sniffed as HTTP.
    pub protocol_http: AtomicU64,
    /// Connections sniffed as SOCKS5.
    pub protocol_socks5: AtomicU64,
    /// Connections sniffed as raw.
    pub protocol_raw: AtomicU64,
    /// Sniff failures (empty, timeout, I/O error).
    pub sniff_failed: AtomicU64,
    /// Handshakes that ended without a relay.
    pub handshakes_rejected: AtomicU64,
    /// Backend connection successes.
    pub backend_connected: AtomicU64,
    /// Backend connection failures.
    pub backend_failed: AtomicU64,
    /// Relays started.
    pub relays_started: AtomicU64,
    /// Relays torn down.
    pub relays_closed: AtomicU64,
    /// Bytes relayed to the backend.
    pub bytes_to_backend: AtomicU64,
    /// Bytes relayed from the backend.
    pub bytes_from_backend: AtomicU64,
}

/// Point-in-time copy of [`ListenerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub connections_accepted: u64,
    pub connections_active: u64,
    pub connections_closed: u64,
    pub connections_rejected: u64,
    pub protocol_http: u64,
    pub protocol_socks5: u64,
    pub protocol_raw: u64,
    pub sniff_failed: u64,
    pub handshakes_rejected: u64,
    pub backend_connected: u64,
    pub backend_failed: u64,
    pub relays_started: u64,
    pub relays_closed: u64,
    pub bytes_to_backend: u64,
    pub bytes_from_backend: u64,
}

impl ListenerStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            connections_accepted: load(&self.connections_accepted),
            connections_active: load(&self.connections_active),
            connections_closed: load(&self.connections_closed),
            connections_rejected: load(&self.connections_rejected),
            protocol_http: load(&self.protocol_http),
            protocol_socks5: load(&self.protocol_socks5),
            protocol_raw: load(&self.protocol_raw),
            sniff_failed: load(&self.sniff_failed),
            handshakes_rejected: load(&self.handshakes_rejected),
            backend_connected: load(&self.backend_connected),
            backend_failed: load(&self.backend_failed),
            relays_started: load(&self.relays_started),
            relays_closed: load(&self.relays_closed),
            bytes_to_backend: load(&self.bytes_to_backend),
            bytes_from_backend: load(&self.bytes_from_backend),
        }
    }

    fn record_protocol(&self, protocol: Protocol) {
        let counter = match protocol {
            Protocol::Http => &self.protocol_http,
            Protocol::Socks5 => &self.protocol_socks5,
            Protocol::Raw => &self.protocol_raw,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Handle on the sessions a listener has in flight.
///
/// Stays usable after [`Listener::run`] has consumed the listener.
#[derive(Debug, Clone)]
pub struct ActiveConnections {
    semaphore: Arc<Semaphore>,
    max: u32,
}

impl ActiveConnections {
    /// Number of sessions currently holding a slot.
    pub fn count(&self) -> usize {
        (self.max as usize).saturating_sub(self.semaphore.available_permits())
    }

    /// Wait for every in-flight session to finish, up to `grace`.
    ///
    /// Returns `true` if all sessions ended in time.
    pub async fn drain(&self, grace: Duration) -> bool {
        match timeout(grace, self.semaphore.acquire_many(self.max)).await {
            Ok(_) => true,
            Err(_) => false,
        }
    }
}

/// A TCP listener for the relay.
pub struct Listener {
    /// The TCP listener.
    listener: TcpListener,
    /// Shared per-connection state.
    handler: Arc<ConnectionHandler>,
    /// Connection semaphore for limiting concurrent connections.
    conn_semaphore: Arc<Semaphore>,
    /// Semaphore capacity.
    max_connections: u32,
    /// Statistics.
    stats: Arc<ListenerStats>,
}

impl Listener {
    /// Bind the listening socket described by `config`.
    ///
    /// Uses `SO_REUSEADDR` and a backlog of `max_connections`.
    pub fn bind(config: Arc<ProxyConfig>) -> io::Result<Self> {
        let bind_addr = config.listen_addr();
        let socket = match bind_addr {
            SocketAddr::V4(_) => TcpSocket::new_v4()?,
            SocketAddr::V6(_) => TcpSocket::new_v6()?,
        };
        socket.set_reuseaddr(true)?;
        socket.bind(bind_addr)?;

        let max_connections = u32::try_from(config.max_connections).unwrap_or(u32::MAX);
        let listener = socket.listen(max_connections)?;
        let local_addr = listener.local_addr()?;

        info!(
            bind_addr = %local_addr,
            max_connections = max_connections,
            "Listener bound"
        );

        let stats = Arc::new(ListenerStats::default());
        let connector = Arc::new(BackendConnector::new(
            config.backend_host.clone(),
            config.backend_port,
        ));
        let handler = Arc::new(ConnectionHandler {
            sniffer: Sniffer::new(config.sniff_timeout()),
            handshaker: Handshaker::new(Arc::clone(&config), connector),
            stats: Arc::clone(&stats),
        });

        Ok(Self {
            listener,
            handler,
            conn_semaphore: Arc::new(Semaphore::new(max_connections as usize)),
            max_connections,
            stats,
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get listener statistics.
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// Handle for observing and draining in-flight sessions.
    pub fn active_connections(&self) -> ActiveConnections {
        ActiveConnections {
            semaphore: Arc::clone(&self.conn_semaphore),
            max: self.max_connections,
        }
    }

    /// Run the accept loop until `shutdown` becomes `true`.
    ///
    /// The listening socket closes when this returns. An accept error ends
    /// the loop and is returned.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(bind_addr = %local_addr, "Listener started");

        loop {
            let (stream, peer_addr) = tokio::select! {
                biased;
                _ = shutdown.wait_for(|stop| *stop) => {
                    info!(bind_addr = %local_addr, "Listener stopped");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "Accept error");
                        return Err(e);
                    }
                },
            };

            let permit = match Arc::clone(&self.conn_semaphore).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    self.stats
                        .connections_rejected
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(peer_addr = %peer_addr, "Connection rejected: max connections reached");
                    continue;
                }
            };

            self.stats
                .connections_accepted
                .fetch_add(1, Ordering::Relaxed);
            self.stats
                .connections_active
                .fetch_add(1, Ordering::Relaxed);

            let handler = Arc::clone(&self.handler);
            let stats = Arc::clone(&self.stats);

            tokio::spawn(
                async move {
                    handler.handle(stream, peer_addr).await;

                    stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                    stats.connections_closed.fetch_add(1, Ordering::Relaxed);
                    drop(permit);
                }
                .instrument(tracing::info_span!("connection", peer = %peer_addr)),
            );
        }
    }
}

/// State shared by every connection task.
struct ConnectionHandler {
    sniffer: Sniffer,
    handshaker: Handshaker,
    stats: Arc<ListenerStats>,
}

impl ConnectionHandler {
    /// Handle a single connection from accept to teardown.
    async fn handle(&self, client: TcpStream, peer_addr: SocketAddr) {
        info!(peer_addr = %peer_addr, "Connection accepted");

        if let Err(e) = client.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY on client");
        }

        let outcome = match self.sniffer.sniff(&client).await {
            SniffResult::Detected(protocol) => {
                self.stats.record_protocol(protocol);
                info!(protocol = %protocol, "Protocol detected");
                self.handshaker.negotiate(client, protocol).await
            }
            other => {
                self.stats.sniff_failed.fetch_add(1, Ordering::Relaxed);
                match &other {
                    SniffResult::Timeout => debug!("Sniff timed out"),
                    SniffResult::IoError(e) => debug!(error = %e, "Sniff failed"),
                    _ => debug!("Peer closed before sending data"),
                }
                drop(client);
                HandshakeResult::NotRecognized
            }
        };

        match outcome {
            HandshakeResult::Established { client, backend } => {
                self.stats.backend_connected.fetch_add(1, Ordering::Relaxed);
                self.stats.relays_started.fetch_add(1, Ordering::Relaxed);
                info!(
                    backend_addr = %self.handshaker.connector().addr(),
                    "Relay started"
                );

                let summary = RelayPair::new(client, backend).run().await;

                self.stats
                    .bytes_to_backend
                    .fetch_add(summary.bytes_to_backend, Ordering::Relaxed);
                self.stats
                    .bytes_from_backend
                    .fetch_add(summary.bytes_from_backend, Ordering::Relaxed);
                self.stats.relays_closed.fetch_add(1, Ordering::Relaxed);

                if let Some(e) = summary.client_error.as_ref().or(summary.backend_error.as_ref()) {
                    debug!(error = %e, "Relay ended with error");
                }
                info!(
                    bytes_to_backend = summary.bytes_to_backend,
                    bytes_from_backend = summary.bytes_from_backend,
                    elapsed_ms = summary.elapsed.as_millis() as u64,
                    "Relay closed"
                );
            }
            HandshakeResult::Rejected(rejection) => {
                self.stats
                    .handshakes_rejected
                    .fetch_add(1, Ordering::Relaxed);
                self.log_rejection(&rejection);
            }
            HandshakeResult::NotRecognized => {
                debug!("Connection closed without handshake");
            }
        }
    }

    fn log_rejection(&self, rejection: &Rejection) {
        let reason = rejection.reason_code();
        match rejection {
            Rejection::BackendUnavailable(e) => {
                self.stats.backend_failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    backend_addr = %self.handshaker.connector().addr(),
                    error = %e,
                    reason = reason,
                    "Backend connection failed"
                );
            }
            r if r.is_expected() => info!(reason = reason, "Handshake answered without relay"),
            r => info!(reason = reason, error = %r, "Handshake rejected"),
        }
    }
}
