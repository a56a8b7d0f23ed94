//! SOCKS5 handshake engine.
//!
//! State machine: greeting -> request -> connected | rejected.
//!
//! - Any greeting is answered with "no authentication required"
//! - Only CONNECT is served; other commands are dropped without a reply
//! - IPv4 and domain targets are parsed for logging only; the connection
//!   always goes to the fixed backend
//! - Other address types get reply 0x08, an unreachable backend reply 0x05

use std::time::Duration;

use sshgate_wire::socks5::{
    encode_reply, failure_reply, Greeting, ReplyCode, IPV4_BODY_LEN, IPV6_BODY_LEN,
    NO_AUTH_REPLY, REQUEST_HEADER_LEN,
};
use sshgate_wire::{AddressType, Command, RequestHeader, TargetAddr};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, info};

use super::backend::BackendConnector;
use super::error::Rejection;
use super::handshake::{read_exact_within, HandshakeResult};

/// Upper bound on draining an IPv6 request body after the 0x08 reply.
const IPV6_DRAIN_TIMEOUT: Duration = Duration::from_millis(250);

/// SOCKS5 engine for one connection.
pub struct Socks5Engine<'a> {
    connector: &'a BackendConnector,
    read_timeout: Duration,
}

impl<'a> Socks5Engine<'a> {
    pub fn new(connector: &'a BackendConnector, read_timeout: Duration) -> Self {
        Self {
            connector,
            read_timeout,
        }
    }

    /// Run the handshake on `client`.
    pub async fn handshake(&self, mut client: TcpStream) -> HandshakeResult {
        let outcome = self.negotiate(&mut client).await;
        HandshakeResult::from_outcome(client, outcome)
    }

    async fn negotiate(&self, client: &mut TcpStream) -> Result<TcpStream, Rejection> {
        self.greet(client).await?;
        let target = self.read_request(client).await?;

        info!(
            target_addr = %target,
            backend_addr = %self.connector.addr(),
            "SOCKS5 CONNECT"
        );

        match self.connector.connect().await {
            Ok(backend) => {
                let bound = backend.peer_addr()?;
                client
                    .write_all(&encode_reply(ReplyCode::Succeeded, bound))
                    .await?;
                Ok(backend)
            }
            Err(e) => {
                send_failure(client, ReplyCode::ConnectionRefused).await;
                Err(Rejection::BackendUnavailable(e))
            }
        }
    }

    /// Read the greeting and answer "no authentication".
    async fn greet(&self, client: &mut TcpStream) -> Result<(), Rejection> {
        let mut header = [0u8; 2];
        read_exact_within(client, &mut header, self.read_timeout).await?;
        let count = Greeting::method_count(header)?;

        let mut methods = vec![0u8; count];
        read_exact_within(client, &mut methods, self.read_timeout).await?;
        let greeting = Greeting { methods };

        if !greeting.offers_no_auth() {
            debug!(methods = ?greeting.methods, "Client did not offer no-auth; answering no-auth anyway");
        }

        client.write_all(&NO_AUTH_REPLY).await?;
        Ok(())
    }

    /// Read the CONNECT request and decode its target.
    async fn read_request(&self, client: &mut TcpStream) -> Result<TargetAddr, Rejection> {
        let mut raw = [0u8; REQUEST_HEADER_LEN];
        read_exact_within(client, &mut raw, self.read_timeout).await?;
        let header = RequestHeader::parse(raw)?;

        if header.command != Command::Connect {
            return Err(Rejection::UnsupportedCommand(header.command));
        }

        match header.address_type {
            AddressType::Ipv4 => {
                let mut body = [0u8; IPV4_BODY_LEN];
                read_exact_within(client, &mut body, self.read_timeout).await?;
                Ok(TargetAddr::from_ipv4_body(&body)?)
            }
            AddressType::Domain => {
                let mut len = [0u8; 1];
                read_exact_within(client, &mut len, self.read_timeout).await?;
                let mut body = vec![0u8; len[0] as usize + 2];
                read_exact_within(client, &mut body, self.read_timeout).await?;
                Ok(TargetAddr::from_domain_body(&body)?)
            }
            other => {
                send_failure(client, ReplyCode::AddressTypeNotSupported).await;
                if other == AddressType::Ipv6 {
                    // Unread body bytes at close would reset the reply away
                    let mut body = [0u8; IPV6_BODY_LEN];
                    let drain = self.read_timeout.min(IPV6_DRAIN_TIMEOUT);
                    let _ = read_exact_within(client, &mut body, drain).await;
                }
                Err(Rejection::UnsupportedAddressType(other))
            }
        }
    }
}

async fn send_failure(client: &mut TcpStream, code: ReplyCode) {
    if let Err(e) = client.write_all(&failure_reply(code)).await {
        debug!(error = %e, reply_code = code.as_byte(), "Failed to send SOCKS5 failure reply");
    }
}
