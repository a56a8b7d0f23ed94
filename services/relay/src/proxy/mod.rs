//! Protocol-sniffing TCP relay.
//!
//! This module provides:
//! - TCP listener management with a connection ceiling
//! - First-bytes protocol detection (peek, never consume)
//! - SOCKS5 and WebSocket-upgrade handshakes
//! - Backend connection and bidirectional relaying
//!
//! ## Architecture
//!
//! ```text
//! Client -> Listener -> Sniffer -> (SOCKS5 | WebSocket | raw) -> Backend Connector -> Relay
//! ```
//!
//! Every protocol path ends at the same fixed backend.
//!
//! ## Usage
//!
//! ```ignore
//! use proxy::Listener;
//!
//! let config = Arc::new(ProxyConfig::default());
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//!
//! let listener = Listener::bind(config)?;
//! let connections = listener.active_connections();
//! listener.run(shutdown_rx).await?;
//! connections.drain(Duration::from_secs(30)).await;
//! ```

mod backend;
mod error;
mod handshake;
mod listener;
mod relay;
mod sniff;
mod socks5;
mod websocket;

pub use backend::{BackendConnector, BackendStats};
pub use error::Rejection;
pub use handshake::{HandshakeResult, Handshaker};
pub use listener::{ActiveConnections, Listener, ListenerStats, StatsSnapshot};
pub use relay::{RelayPair, RelaySummary, RELAY_BUFFER_SIZE};
pub use sniff::{SniffResult, Sniffer};
pub use socks5::Socks5Engine;
pub use websocket::{WebSocketEngine, MAX_REQUEST_HEAD_BYTES};
