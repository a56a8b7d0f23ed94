//! Protocol sniffing on accepted connections.
//!
//! Peeks at the first bytes without consuming them, so the chosen handler
//! sees the complete stream:
//! - sniff timeout: 5s default
//! - max peeked bytes: 1024

use std::time::Duration;

use sshgate_wire::sniff::{classify, Protocol, MAX_PEEK_BYTES};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Result of sniffing a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SniffResult {
    /// Protocol detected from the peeked bytes.
    Detected(Protocol),
    /// Peer closed before sending anything.
    Empty,
    /// No bytes arrived within the timeout.
    Timeout,
    /// I/O error during peek.
    IoError(String),
}

/// Non-destructive protocol detector.
#[derive(Debug, Clone)]
pub struct Sniffer {
    timeout: Duration,
    max_bytes: usize,
}

impl Sniffer {
    /// Create a sniffer with the given timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            max_bytes: MAX_PEEK_BYTES,
        }
    }

    /// Peek at the stream and classify it.
    pub async fn sniff(&self, stream: &TcpStream) -> SniffResult {
        let mut buf = vec![0u8; self.max_bytes];

        match timeout(self.timeout, stream.peek(&mut buf)).await {
            Ok(Ok(n)) => match classify(&buf[..n]) {
                Some(protocol) => SniffResult::Detected(protocol),
                None => SniffResult::Empty,
            },
            Ok(Err(e)) => SniffResult::IoError(e.to_string()),
            Err(_) => SniffResult::Timeout,
        }
    }
}
