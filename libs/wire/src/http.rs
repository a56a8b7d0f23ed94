//! HTTP request-head parsing and WebSocket upgrade responses.
//!
//! The upgrade is camouflage: after the 101 (or configured) response the
//! connection carries raw tunnel bytes, never WebSocket frames.
//!
//! Reference: RFC 6455 section 4.2.2 (accept key computation).

use std::collections::HashMap;
use std::fmt::Write as _;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha1::{Digest, Sha1};

use crate::error::WireError;

/// GUID appended to the client key before hashing (RFC 6455).
pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Compute the `Sec-WebSocket-Accept` value for a client key.
pub fn accept_key(key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Reason phrase for the configured status code.
///
/// Unknown codes fall back to "Switching Protocols".
pub fn status_text(code: u16) -> &'static str {
    match code {
        101 => "Switching Protocols",
        200 => "OK",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        _ => "Switching Protocols",
    }
}

/// Find the end of the request head.
///
/// Returns the index just past the blank line, accepting both `\r\n\r\n`
/// and bare `\n\n` terminators.
pub fn find_head_end(buf: &[u8]) -> Option<usize> {
    let crlf = buf
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|pos| pos + 4);
    let lf = buf.windows(2).position(|w| w == b"\n\n").map(|pos| pos + 2);

    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

/// A parsed HTTP request head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub target: String,
    pub version: String,
    /// Header map keyed by lower-cased name.
    pub headers: HashMap<String, String>,
}

impl HttpRequest {
    /// Parse a request head (request line plus headers).
    ///
    /// Invalid UTF-8 is replaced rather than rejected. Header lines without a
    /// colon are skipped; a repeated header keeps its last value.
    pub fn parse(data: &[u8]) -> Result<Self, WireError> {
        let text = String::from_utf8_lossy(data);
        let mut lines = text.split('\n').map(|line| line.trim_end_matches('\r'));

        let request_line = match lines.next() {
            Some(line) if !line.trim().is_empty() => line.trim(),
            _ => return Err(WireError::EmptyRequest),
        };

        let mut parts = request_line.split_whitespace();
        let (method, target, version) = match (parts.next(), parts.next(), parts.next()) {
            (Some(m), Some(t), Some(v)) if v.starts_with("HTTP/") && parts.next().is_none() => {
                (m, t, v)
            }
            _ => {
                return Err(WireError::MalformedRequestLine(request_line.to_string()));
            }
        };

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                break;
            }
            if let Some((key, value)) = line.split_once(':') {
                headers.insert(key.trim().to_lowercase(), value.trim().to_string());
            }
        }

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    /// Look up a header by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    /// Whether this is a WebSocket upgrade request.
    ///
    /// Requires `Upgrade: websocket`, a `Connection` header mentioning
    /// "websocket" or "upgrade" and a non-empty `Sec-WebSocket-Key`.
    /// Accepting "upgrade" lets the standard browser handshake
    /// (`Connection: Upgrade`) receive the 101 and reach the tunnel.
    pub fn is_websocket_upgrade(&self) -> bool {
        let upgrade = self
            .header("upgrade")
            .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
        let connection = self.header("connection").is_some_and(|v| {
            let v = v.to_lowercase();
            v.contains("websocket") || v.contains("upgrade")
        });

        upgrade && connection && self.websocket_key().is_some()
    }

    /// The non-empty `Sec-WebSocket-Key`, if present.
    pub fn websocket_key(&self) -> Option<&str> {
        self.header("sec-websocket-key").filter(|k| !k.is_empty())
    }
}

/// Build the upgrade response sent before the tunnel starts.
pub fn upgrade_response(code: u16, banner_header: &str, banner: &str, accept: &str) -> String {
    let mut response = String::with_capacity(192 + banner.len());
    let _ = write!(response, "HTTP/1.1 {} {}\r\n", code, status_text(code));
    response.push_str("Upgrade: websocket\r\n");
    response.push_str("Connection: Upgrade\r\n");
    let _ = write!(response, "Sec-WebSocket-Accept: {}\r\n", accept);
    let _ = write!(response, "{}: {}\r\n", banner_header, banner);
    response.push_str("\r\n");
    response
}

/// Build the response for HTTP requests that do not upgrade.
pub fn plain_response(code: u16, banner_header: &str, banner: &str) -> String {
    let body = format!(
        "<html><body><h1>{}</h1></body></html>",
        escape_html(banner)
    );

    let mut response = String::with_capacity(160 + banner.len() + body.len());
    let _ = write!(response, "HTTP/1.1 {} {}\r\n", code, status_text(code));
    response.push_str("Content-Type: text/html\r\n");
    let _ = write!(response, "Content-Length: {}\r\n", body.len());
    response.push_str("Connection: close\r\n");
    let _ = write!(response, "{}: {}\r\n", banner_header, banner);
    response.push_str("\r\n");
    response.push_str(&body);
    response
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const UPGRADE_REQUEST: &[u8] = b"GET /x HTTP/1.1\r\n\
        Host: h\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";

    #[test]
    fn test_accept_key_rfc6455_vector() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_status_text_table() {
        assert_eq!(status_text(101), "Switching Protocols");
        assert_eq!(status_text(200), "OK");
        assert_eq!(status_text(300), "Multiple Choices");
        assert_eq!(status_text(301), "Moved Permanently");
        assert_eq!(status_text(418), "Switching Protocols");
    }

    #[test]
    fn test_find_head_end() {
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\n\r\nrest"), Some(18));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\n\n"), Some(16));
        assert_eq!(find_head_end(b"GET / HTTP/1.1\r\nHost: a\r\n"), None);
    }

    #[test]
    fn test_parse_request() {
        let request = HttpRequest::parse(UPGRADE_REQUEST).unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.target, "/x");
        assert_eq!(request.version, "HTTP/1.1");
        assert_eq!(request.header("HOST"), Some("h"));
        assert_eq!(request.header("upgrade"), Some("websocket"));
    }

    #[test]
    fn test_parse_splits_on_first_colon() {
        let request =
            HttpRequest::parse(b"GET / HTTP/1.1\r\nHost: example.com:8080\r\n\r\n").unwrap();
        assert_eq!(request.header("host"), Some("example.com:8080"));
    }

    #[test]
    fn test_parse_skips_lines_without_colon() {
        let request = HttpRequest::parse(b"GET / HTTP/1.1\r\ngarbage\r\nX-A: 1\r\n\r\n").unwrap();
        assert_eq!(request.headers.len(), 1);
        assert_eq!(request.header("x-a"), Some("1"));
    }

    #[test]
    fn test_parse_empty() {
        assert_eq!(HttpRequest::parse(b""), Err(WireError::EmptyRequest));
        assert_eq!(HttpRequest::parse(b"\r\n\r\n"), Err(WireError::EmptyRequest));
    }

    #[test]
    fn test_parse_malformed_request_line() {
        assert!(matches!(
            HttpRequest::parse(b"GET /\r\n\r\n"),
            Err(WireError::MalformedRequestLine(_))
        ));
        assert!(matches!(
            HttpRequest::parse(b"GET / FTP/1.0\r\n\r\n"),
            Err(WireError::MalformedRequestLine(_))
        ));
    }

    #[test]
    fn test_is_websocket_upgrade() {
        let request = HttpRequest::parse(UPGRADE_REQUEST).unwrap();
        assert!(request.is_websocket_upgrade());
        assert_eq!(request.websocket_key(), Some("dGhlIHNhbXBsZSBub25jZQ=="));

        let request = HttpRequest::parse(
            b"GET / HTTP/1.1\r\nUpgrade: WebSocket\r\nConnection: keep-alive, WebSocket\r\n\
              Sec-WebSocket-Key: abc\r\n\r\n",
        )
        .unwrap();
        assert!(request.is_websocket_upgrade());
        assert_eq!(request.websocket_key(), Some("abc"));
    }

    #[test]
    fn test_upgrade_requires_connection_token() {
        let request = HttpRequest::parse(
            b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: keep-alive\r\n\
              Sec-WebSocket-Key: abc\r\n\r\n",
        )
        .unwrap();
        assert!(!request.is_websocket_upgrade());
    }

    #[test]
    fn test_upgrade_requires_key() {
        let request = HttpRequest::parse(
            b"GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: websocket\r\n\
              Sec-WebSocket-Key:   \r\n\r\n",
        )
        .unwrap();
        assert!(request.websocket_key().is_none());
        assert!(!request.is_websocket_upgrade());
    }

    #[test]
    fn test_upgrade_response_format() {
        let response = upgrade_response(101, "X-Banner", "hello", "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert_eq!(
            response,
            "HTTP/1.1 101 Switching Protocols\r\n\
             Upgrade: websocket\r\n\
             Connection: Upgrade\r\n\
             Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\
             X-Banner: hello\r\n\r\n"
        );
    }

    #[test]
    fn test_plain_response_contains_banner() {
        let response = plain_response(200, "X-Banner", "Tom & <Jerry>");
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(response.contains("X-Banner: Tom & <Jerry>\r\n"));
        assert!(response.contains("Tom &amp; &lt;Jerry&gt;"));

        let (head, body) = response.split_once("\r\n\r\n").unwrap();
        assert!(head.contains(&format!("Content-Length: {}", body.len())));
    }
}
