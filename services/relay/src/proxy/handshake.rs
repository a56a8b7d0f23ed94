//! Handshake dispatch.
//!
//! Routes a sniffed connection to the engine for its protocol. Every
//! successful path yields the client paired with a fresh backend socket.

use std::sync::Arc;
use std::time::Duration;

use sshgate_wire::Protocol;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::backend::BackendConnector;
use super::error::Rejection;
use super::socks5::Socks5Engine;
use super::websocket::WebSocketEngine;
use crate::config::ProxyConfig;

/// Outcome of a handshake.
#[derive(Debug)]
pub enum HandshakeResult {
    /// Client and backend are ready to be relayed.
    Established {
        client: TcpStream,
        backend: TcpStream,
    },
    /// Handshake ended without a relay; the client socket was dropped.
    Rejected(Rejection),
    /// No protocol could be determined (empty peek, timeout, peek error).
    NotRecognized,
}

impl HandshakeResult {
    pub(crate) fn from_outcome(
        client: TcpStream,
        outcome: Result<TcpStream, Rejection>,
    ) -> Self {
        match outcome {
            Ok(backend) => HandshakeResult::Established { client, backend },
            Err(rejection) => HandshakeResult::Rejected(rejection),
        }
    }
}

/// Runs the handshake matching a detected protocol.
pub struct Handshaker {
    config: Arc<ProxyConfig>,
    connector: Arc<BackendConnector>,
}

impl Handshaker {
    pub fn new(config: Arc<ProxyConfig>, connector: Arc<BackendConnector>) -> Self {
        Self { config, connector }
    }

    /// The backend connector shared by all engines.
    pub fn connector(&self) -> &BackendConnector {
        &self.connector
    }

    /// Perform the handshake for `protocol` on `client`.
    pub async fn negotiate(&self, client: TcpStream, protocol: Protocol) -> HandshakeResult {
        let read_timeout = self.config.sniff_timeout();

        match protocol {
            Protocol::Socks5 => {
                Socks5Engine::new(&self.connector, read_timeout)
                    .handshake(client)
                    .await
            }
            Protocol::Http => {
                WebSocketEngine::new(&self.config, &self.connector)
                    .handshake(client)
                    .await
            }
            Protocol::Raw => {
                debug!("Raw passthrough");
                let outcome = self
                    .connector
                    .connect()
                    .await
                    .map_err(Rejection::BackendUnavailable);
                HandshakeResult::from_outcome(client, outcome)
            }
        }
    }
}

/// `read_exact` bounded by a timeout.
pub(crate) async fn read_exact_within(
    stream: &mut TcpStream,
    buf: &mut [u8],
    limit: Duration,
) -> Result<(), Rejection> {
    match timeout(limit, stream.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) => Err(Rejection::Io(e)),
        Err(_) => Err(Rejection::Timeout),
    }
}
