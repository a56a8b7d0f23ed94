//! First-bytes protocol classification.
//!
//! The listener peeks at the start of every connection without consuming
//! it; the bytes are handed here to decide which handshake runs.

use std::fmt;

use crate::socks5;

/// Maximum bytes peeked before classification.
pub const MAX_PEEK_BYTES: usize = 1024;

const HTTP_METHOD_PREFIXES: [&[u8]; 2] = [b"GET ", b"POST "];

/// Protocol spoken by a client, as judged from its first bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// HTTP request, possibly a WebSocket upgrade.
    Http,
    /// SOCKS5 greeting.
    Socks5,
    /// Anything else; tunneled to the backend untouched.
    Raw,
}

impl Protocol {
    /// Short lowercase name used in log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Socks5 => "socks5",
            Protocol::Raw => "raw",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify peeked bytes.
///
/// Returns `None` for an empty slice (the peer closed before sending).
pub fn classify(peeked: &[u8]) -> Option<Protocol> {
    if peeked.is_empty() {
        return None;
    }

    if HTTP_METHOD_PREFIXES
        .iter()
        .any(|prefix| peeked.starts_with(prefix))
    {
        return Some(Protocol::Http);
    }

    if peeked.len() >= 2 && peeked[0] == socks5::VERSION {
        return Some(Protocol::Socks5);
    }

    Some(Protocol::Raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_http() {
        assert_eq!(classify(b"GET / HTTP/1.1\r\n"), Some(Protocol::Http));
        assert_eq!(classify(b"POST /upload HTTP/1.1\r\n"), Some(Protocol::Http));
    }

    #[test]
    fn test_classify_http_requires_space() {
        // "GETX" is not an HTTP method we recognize
        assert_eq!(classify(b"GETX"), Some(Protocol::Raw));
        assert_eq!(classify(b"PUT / HTTP/1.1\r\n"), Some(Protocol::Raw));
    }

    #[test]
    fn test_classify_socks5() {
        assert_eq!(classify(&[0x05, 0x01, 0x00]), Some(Protocol::Socks5));
        assert_eq!(classify(&[0x05, 0x02]), Some(Protocol::Socks5));
    }

    #[test]
    fn test_classify_lone_socks_byte_is_raw() {
        assert_eq!(classify(&[0x05]), Some(Protocol::Raw));
    }

    #[test]
    fn test_classify_ssh_banner_is_raw() {
        assert_eq!(classify(b"SSH-2.0-OpenSSH_9.6\r\n"), Some(Protocol::Raw));
    }

    #[test]
    fn test_classify_empty() {
        assert_eq!(classify(&[]), None);
    }
}
