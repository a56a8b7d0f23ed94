//! sshgate relay
//!
//! A single listening port that accepts raw, SOCKS5 and HTTP/WebSocket
//! clients, performs the minimal handshake each one expects, and relays
//! the connection to a fixed backend (normally the local SSH daemon).
//!
//! ## Modules
//!
//! - [`config`]: JSON configuration with per-field fallback to defaults
//! - [`logging`]: tracing subscriber setup
//! - [`proxy`]: listener, sniffer, handshake engines and relay
//! - [`server`]: process lifecycle (bind, signals, drain)
//! - [`cli`]: command-line entry point

pub mod cli;
pub mod config;
pub mod logging;
pub mod proxy;
pub mod server;

pub use config::{ConfigLoad, ConfigSource, LogFormat, ProxyConfig};
pub use proxy::{Listener, ListenerStats, StatsSnapshot};
