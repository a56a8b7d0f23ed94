//! SOCKS5 (RFC 1928) codec, restricted to what sshgate speaks.
//!
//! Supported subset:
//! - Method negotiation always answers "no authentication required"
//! - Only the CONNECT command
//! - IPv4 and domain-name target addresses
//!
//! Request wire format:
//! - 1 byte version (0x05)
//! - 1 byte command
//! - 1 byte reserved
//! - 1 byte address type
//! - variable: address
//! - 2 bytes port (big-endian)

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

use crate::error::WireError;

/// SOCKS protocol version.
pub const VERSION: u8 = 0x05;

/// Authentication method: no authentication required.
pub const METHOD_NO_AUTH: u8 = 0x00;

/// Reply to any greeting: version 5, no authentication.
pub const NO_AUTH_REPLY: [u8; 2] = [VERSION, METHOD_NO_AUTH];

/// Length of the fixed request header (version, command, reserved, address type).
pub const REQUEST_HEADER_LEN: usize = 4;

/// Length of an IPv4 address body (4 address + 2 port).
pub const IPV4_BODY_LEN: usize = 6;

/// Length of an IPv6 address body (16 address + 2 port).
pub const IPV6_BODY_LEN: usize = 18;

/// Length of an IPv4 reply (header + IPv4 body).
pub const IPV4_REPLY_LEN: usize = REQUEST_HEADER_LEN + IPV4_BODY_LEN;

const CMD_CONNECT: u8 = 0x01;
const CMD_BIND: u8 = 0x02;
const CMD_UDP_ASSOCIATE: u8 = 0x03;

const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Reply codes used by sshgate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplyCode {
    Succeeded = 0x00,
    GeneralFailure = 0x01,
    ConnectionRefused = 0x05,
    CommandNotSupported = 0x07,
    AddressTypeNotSupported = 0x08,
}

impl ReplyCode {
    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// SOCKS5 request command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Bind,
    UdpAssociate,
    Unknown(u8),
}

impl From<u8> for Command {
    fn from(byte: u8) -> Self {
        match byte {
            CMD_CONNECT => Command::Connect,
            CMD_BIND => Command::Bind,
            CMD_UDP_ASSOCIATE => Command::UdpAssociate,
            other => Command::Unknown(other),
        }
    }
}

/// SOCKS5 address type (ATYP).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressType {
    Ipv4,
    Domain,
    Ipv6,
    Unknown(u8),
}

impl From<u8> for AddressType {
    fn from(byte: u8) -> Self {
        match byte {
            ATYP_IPV4 => AddressType::Ipv4,
            ATYP_DOMAIN => AddressType::Domain,
            ATYP_IPV6 => AddressType::Ipv6,
            other => AddressType::Unknown(other),
        }
    }
}

/// Client greeting: version plus offered authentication methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Greeting {
    pub methods: Vec<u8>,
}

impl Greeting {
    /// Validate the 2-byte greeting header and return the method count.
    ///
    /// Only the version is checked; a count of zero is accepted.
    pub fn method_count(header: [u8; 2]) -> Result<usize, WireError> {
        if header[0] != VERSION {
            return Err(WireError::UnsupportedVersion(header[0]));
        }
        Ok(header[1] as usize)
    }

    /// Whether the client offered the no-authentication method.
    pub fn offers_no_auth(&self) -> bool {
        self.methods.contains(&METHOD_NO_AUTH)
    }
}

/// Fixed-size head of a SOCKS5 request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestHeader {
    pub command: Command,
    pub address_type: AddressType,
}

impl RequestHeader {
    /// Parse the 4-byte request header.
    pub fn parse(header: [u8; REQUEST_HEADER_LEN]) -> Result<Self, WireError> {
        if header[0] != VERSION {
            return Err(WireError::UnsupportedVersion(header[0]));
        }
        // header[2] is reserved and ignored
        Ok(Self {
            command: Command::from(header[1]),
            address_type: AddressType::from(header[3]),
        })
    }
}

/// Target requested by the client.
///
/// Recorded for logging only: sshgate always connects to its fixed backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetAddr {
    Ipv4(SocketAddrV4),
    Domain(String, u16),
}

impl TargetAddr {
    /// Decode the IPv4 body (4 address bytes + 2 port bytes).
    pub fn from_ipv4_body(body: &[u8]) -> Result<Self, WireError> {
        if body.len() < IPV4_BODY_LEN {
            return Err(WireError::Truncated {
                needed: IPV4_BODY_LEN,
                actual: body.len(),
            });
        }
        let ip = Ipv4Addr::new(body[0], body[1], body[2], body[3]);
        let port = u16::from_be_bytes([body[4], body[5]]);
        Ok(TargetAddr::Ipv4(SocketAddrV4::new(ip, port)))
    }

    /// Decode the domain body that follows the 1-byte length prefix:
    /// `name` bytes followed by 2 port bytes.
    pub fn from_domain_body(body: &[u8]) -> Result<Self, WireError> {
        if body.len() < 2 {
            return Err(WireError::Truncated {
                needed: 2,
                actual: body.len(),
            });
        }
        // An empty name is accepted; the target is only logged
        let (name, port) = body.split_at(body.len() - 2);
        let name = std::str::from_utf8(name).map_err(|_| WireError::InvalidDomain)?;
        Ok(TargetAddr::Domain(
            name.to_string(),
            u16::from_be_bytes([port[0], port[1]]),
        ))
    }
}

impl fmt::Display for TargetAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetAddr::Ipv4(addr) => write!(f, "{}", addr),
            TargetAddr::Domain(name, port) => write!(f, "{}:{}", name, port),
        }
    }
}

/// Encode a reply carrying `bound` as the bind address.
pub fn encode_reply(code: ReplyCode, bound: SocketAddr) -> Vec<u8> {
    let mut buf = Vec::with_capacity(22);
    buf.extend_from_slice(&[VERSION, code.as_byte(), 0x00]);

    match bound.ip() {
        IpAddr::V4(ip) => {
            buf.push(ATYP_IPV4);
            buf.extend_from_slice(&ip.octets());
        }
        IpAddr::V6(ip) => {
            buf.push(ATYP_IPV6);
            buf.extend_from_slice(&ip.octets());
        }
    }

    buf.extend_from_slice(&bound.port().to_be_bytes());
    buf
}

/// Encode a failure reply with an all-zero IPv4 body.
pub fn failure_reply(code: ReplyCode) -> [u8; IPV4_REPLY_LEN] {
    [VERSION, code.as_byte(), 0x00, ATYP_IPV4, 0, 0, 0, 0, 0, 0]
}
