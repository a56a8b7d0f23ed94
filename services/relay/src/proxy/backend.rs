//! Backend connection.
//!
//! Every protocol path tunnels to the same backend (normally the local SSH
//! daemon). Connects are attempted once with no timeout beyond the OS
//! default; callers send the protocol-specific failure reply.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::TcpStream;
use tracing::debug;

/// Connector for the fixed backend.
#[derive(Debug)]
pub struct BackendConnector {
    /// Backend host (IP literal or name resolved per connect).
    host: String,
    /// Backend port.
    port: u16,
    /// Total connections attempted.
    connections_attempted: AtomicU64,
    /// Total connections succeeded.
    connections_succeeded: AtomicU64,
}

impl BackendConnector {
    /// Create a connector for `host:port`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connections_attempted: AtomicU64::new(0),
            connections_succeeded: AtomicU64::new(0),
        }
    }

    /// Backend address for display.
    pub fn addr(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Open a new connection to the backend.
    pub async fn connect(&self) -> io::Result<TcpStream> {
        self.connections_attempted.fetch_add(1, Ordering::Relaxed);
        debug!(backend_addr = %self.addr(), "Connecting to backend");

        let stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        stream.set_nodelay(true)?;

        self.connections_succeeded.fetch_add(1, Ordering::Relaxed);
        Ok(stream)
    }

    /// Get connection statistics.
    pub fn stats(&self) -> BackendStats {
        BackendStats {
            connections_attempted: self.connections_attempted.load(Ordering::Relaxed),
            connections_succeeded: self.connections_succeeded.load(Ordering::Relaxed),
        }
    }
}

/// Statistics for backend connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendStats {
    pub connections_attempted: u64,
    pub connections_succeeded: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_backend_addr() {
        assert_eq!(BackendConnector::new("127.0.0.1", 22).addr(), "127.0.0.1:22");
        assert_eq!(BackendConnector::new("::1", 2222).addr(), "[::1]:2222");
    }

    #[tokio::test]
    async fn test_connect_success() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let connector = BackendConnector::new("127.0.0.1", addr.port());
        let stream = connector.connect().await.unwrap();
        assert_eq!(stream.peer_addr().unwrap(), addr);
        assert_eq!(connector.stats().connections_succeeded, 1);
    }

    #[tokio::test]
    async fn test_connect_refused_is_not_retried() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let connector = BackendConnector::new("127.0.0.1", port);
        assert!(connector.connect().await.is_err());

        let stats = connector.stats();
        assert_eq!(stats.connections_attempted, 1);
        assert_eq!(stats.connections_succeeded, 0);
    }
}
