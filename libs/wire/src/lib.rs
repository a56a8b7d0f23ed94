//! Wire formats spoken on the sshgate listening port.
//!
//! This library provides pure (I/O free) helpers for:
//! - Classifying a connection from its first bytes
//! - SOCKS5 greeting/request parsing and reply encoding
//! - HTTP request-head parsing and WebSocket upgrade responses
//!
//! The async service in `services/relay` drives these over real sockets.

pub mod error;
pub mod http;
pub mod sniff;
pub mod socks5;

pub use error::WireError;
pub use http::{accept_key, status_text, HttpRequest};
pub use sniff::{classify, Protocol};
pub use socks5::{AddressType, Command, ReplyCode, RequestHeader, TargetAddr};
