//! WebSocket upgrade handshake engine.
//!
//! Reads the HTTP request head, answers upgrade requests with the computed
//! accept key and the configured status code, then hands the connection to
//! the relay as a raw byte stream (no WebSocket framing). Anything else gets
//! a plain HTTP response and is closed without touching the backend.

use std::time::Duration;

use sshgate_wire::http::{self, find_head_end, HttpRequest};
use sshgate_wire::WireError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};

use super::backend::BackendConnector;
use super::error::Rejection;
use super::handshake::HandshakeResult;
use crate::config::ProxyConfig;

/// Maximum size of an HTTP request head.
pub const MAX_REQUEST_HEAD_BYTES: usize = 8192;

/// WebSocket engine for one connection.
pub struct WebSocketEngine<'a> {
    config: &'a ProxyConfig,
    connector: &'a BackendConnector,
}

impl<'a> WebSocketEngine<'a> {
    pub fn new(config: &'a ProxyConfig, connector: &'a BackendConnector) -> Self {
        Self { config, connector }
    }

    /// Run the handshake on `client`.
    pub async fn handshake(&self, mut client: TcpStream) -> HandshakeResult {
        let outcome = self.negotiate(&mut client).await;
        HandshakeResult::from_outcome(client, outcome)
    }

    async fn negotiate(&self, client: &mut TcpStream) -> Result<TcpStream, Rejection> {
        let (head, early_data) = read_request_head(client, self.config.sniff_timeout()).await?;
        let request = HttpRequest::parse(&head)?;

        debug!(
            method = %request.method,
            target = %request.target,
            upgrade = request.is_websocket_upgrade(),
            "HTTP request"
        );

        let key = match request.websocket_key() {
            Some(key) if request.is_websocket_upgrade() && self.config.websocket_enabled => key,
            _ => {
                self.send_plain(client).await?;
                return Err(if request.is_websocket_upgrade() {
                    Rejection::WebSocketDisabled
                } else {
                    Rejection::PlainHttp
                });
            }
        };

        let response = http::upgrade_response(
            self.config.http_response_code,
            &self.config.banner_header,
            &self.config.custom_message,
            &http::accept_key(key),
        );
        client.write_all(response.as_bytes()).await?;

        info!(
            status = self.config.http_response_code,
            banner = %self.config.custom_message,
            "WebSocket upgrade accepted"
        );

        let mut backend = self
            .connector
            .connect()
            .await
            .map_err(Rejection::BackendUnavailable)?;

        // Bytes the client pipelined behind the request head
        if !early_data.is_empty() {
            backend.write_all(&early_data).await?;
        }

        Ok(backend)
    }

    async fn send_plain(&self, client: &mut TcpStream) -> Result<(), Rejection> {
        let response = http::plain_response(
            self.config.http_response_code,
            &self.config.banner_header,
            &self.config.custom_message,
        );
        client.write_all(response.as_bytes()).await?;
        if let Err(e) = client.shutdown().await {
            debug!(error = %e, "Shutdown after plain response failed");
        }
        Ok(())
    }
}

/// Read until the end of the request head.
///
/// Returns the head and any bytes received after it. A peer that closes
/// mid-head yields what was received so far.
async fn read_request_head(
    client: &mut TcpStream,
    limit: Duration,
) -> Result<(Vec<u8>, Vec<u8>), Rejection> {
    let read = async {
        let mut buf = Vec::with_capacity(1024);
        let mut chunk = [0u8; 1024];

        loop {
            if let Some(end) = find_head_end(&buf) {
                let rest = buf.split_off(end);
                return Ok((buf, rest));
            }
            if buf.len() >= MAX_REQUEST_HEAD_BYTES {
                return Err(Rejection::RequestTooLarge {
                    limit: MAX_REQUEST_HEAD_BYTES,
                });
            }

            let n = client.read(&mut chunk).await?;
            if n == 0 {
                if buf.is_empty() {
                    return Err(Rejection::Wire(WireError::EmptyRequest));
                }
                return Ok((buf, Vec::new()));
            }
            buf.extend_from_slice(&chunk[..n]);
        }
    };

    match timeout(limit, read).await {
        Ok(result) => result,
        Err(_) => Err(Rejection::Timeout),
    }
}
