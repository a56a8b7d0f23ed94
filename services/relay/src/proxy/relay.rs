//! Bidirectional relay between a client and its backend.
//!
//! Two pump loops run concurrently, one per direction. A shared `active`
//! flag ties them together: the first loop to finish clears it, and the
//! other loop stops at its next read or write. Both sockets are then shut
//! down and dropped together, so a session never leaves one side half-open.

use std::io;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::debug;

/// Read buffer size for each direction.
pub const RELAY_BUFFER_SIZE: usize = 4096;

/// A paired client and backend socket.
#[derive(Debug)]
pub struct RelayPair {
    client: TcpStream,
    backend: TcpStream,
    active: watch::Sender<bool>,
}

/// Result of a finished relay.
#[derive(Debug)]
pub struct RelaySummary {
    /// Bytes copied client -> backend.
    pub bytes_to_backend: u64,
    /// Bytes copied backend -> client.
    pub bytes_from_backend: u64,
    /// Error that ended the client -> backend direction, if any.
    pub client_error: Option<io::Error>,
    /// Error that ended the backend -> client direction, if any.
    pub backend_error: Option<io::Error>,
    /// Time from relay start to teardown.
    pub elapsed: Duration,
}

impl RelayPair {
    pub fn new(client: TcpStream, backend: TcpStream) -> Self {
        let (active, _) = watch::channel(true);
        Self {
            client,
            backend,
            active,
        }
    }

    /// Relay until either side closes or errors, then tear down both sockets.
    pub async fn run(self) -> RelaySummary {
        let Self {
            mut client,
            mut backend,
            active,
        } = self;
        let started = Instant::now();

        let ((bytes_to_backend, client_error), (bytes_from_backend, backend_error)) = {
            let (client_read, client_write) = client.split();
            let (backend_read, backend_write) = backend.split();

            tokio::join!(
                pump(client_read, backend_write, &active),
                pump(backend_read, client_write, &active),
            )
        };

        if let Err(e) = client.shutdown().await {
            debug!(error = %e, "Client shutdown failed");
        }
        if let Err(e) = backend.shutdown().await {
            debug!(error = %e, "Backend shutdown failed");
        }
        drop(client);
        drop(backend);

        RelaySummary {
            bytes_to_backend,
            bytes_from_backend,
            client_error,
            backend_error,
            elapsed: started.elapsed(),
        }
    }
}

/// Copy `reader` into `writer` until EOF, an error, or the pair goes inactive.
async fn pump<R, W>(
    mut reader: R,
    mut writer: W,
    active: &watch::Sender<bool>,
) -> (u64, Option<io::Error>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut stopped = active.subscribe();
    let mut buf = vec![0u8; RELAY_BUFFER_SIZE];
    let mut total = 0u64;
    let mut failure = None;

    loop {
        let n = tokio::select! {
            _ = stopped.wait_for(|active| !*active) => break,
            read = reader.read(&mut buf) => match read {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            },
        };

        tokio::select! {
            _ = stopped.wait_for(|active| !*active) => break,
            written = writer.write_all(&buf[..n]) => {
                if let Err(e) = written {
                    failure = Some(e);
                    break;
                }
                total += n as u64;
            }
        }
    }

    active.send_replace(false);
    (total, failure)
}
