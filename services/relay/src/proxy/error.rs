//! Handshake rejection reasons.

use std::io;

use sshgate_wire::{AddressType, Command, WireError};
use thiserror::Error;

/// Why a handshake ended without a relay.
#[derive(Debug, Error)]
pub enum Rejection {
    /// Client bytes did not parse.
    #[error("malformed handshake: {0}")]
    Wire(#[from] WireError),

    /// SOCKS5 command other than CONNECT (no reply is sent).
    #[error("unsupported SOCKS5 command: {0:?}")]
    UnsupportedCommand(Command),

    /// SOCKS5 address type other than IPv4 or domain (0x08 reply sent).
    #[error("unsupported SOCKS5 address type: {0:?}")]
    UnsupportedAddressType(AddressType),

    /// The backend refused or could not be reached.
    #[error("backend unavailable: {0}")]
    BackendUnavailable(io::Error),

    /// Non-upgrade HTTP request; answered with the plain response.
    #[error("plain HTTP request answered")]
    PlainHttp,

    /// Upgrade request while upgrades are disabled; answered with the plain response.
    #[error("websocket upgrade disabled")]
    WebSocketDisabled,

    /// Request head did not end within the size limit.
    #[error("request head exceeds {limit} bytes")]
    RequestTooLarge { limit: usize },

    /// Client stalled during the handshake.
    #[error("handshake timed out")]
    Timeout,

    /// Socket error during the handshake.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl Rejection {
    /// Stable reason code for log fields.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Rejection::Wire(_) => "malformed",
            Rejection::UnsupportedCommand(_) => "unsupported_command",
            Rejection::UnsupportedAddressType(_) => "unsupported_address_type",
            Rejection::BackendUnavailable(_) => "backend_unavailable",
            Rejection::PlainHttp => "plain_http",
            Rejection::WebSocketDisabled => "websocket_disabled",
            Rejection::RequestTooLarge { .. } => "request_too_large",
            Rejection::Timeout => "timeout",
            Rejection::Io(_) => "io_error",
        }
    }

    /// Whether the rejection is an expected outcome rather than a failure.
    pub fn is_expected(&self) -> bool {
        matches!(self, Rejection::PlainHttp | Rejection::WebSocketDisabled)
    }
}
