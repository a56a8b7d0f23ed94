//! Error types for wire parsing.

use thiserror::Error;

/// Errors that can occur while parsing handshake bytes.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Not enough bytes to decode the structure.
    #[error("truncated input: need {needed} bytes, got {actual}")]
    Truncated { needed: usize, actual: usize },

    /// SOCKS version byte was not 0x05.
    #[error("unsupported SOCKS version: {0:#04x}")]
    UnsupportedVersion(u8),

    /// Domain name in a SOCKS5 request is not valid UTF-8.
    #[error("invalid domain name in SOCKS5 request")]
    InvalidDomain,

    /// The HTTP request is empty.
    #[error("empty HTTP request")]
    EmptyRequest,

    /// The HTTP request line is not `METHOD TARGET HTTP/x.y`.
    #[error("malformed HTTP request line: {0:?}")]
    MalformedRequestLine(String),
}

