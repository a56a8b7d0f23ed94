//! Relay configuration.
//!
//! Loaded once at startup from a JSON file and read-only afterwards. Every
//! field is merged over its default independently: a missing file yields
//! the defaults, and a malformed document or an invalid field value falls
//! back to the default with a warning instead of failing the load.

use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sshgate/config.json";

/// Default listening port.
pub const DEFAULT_PORT: u16 = 1080;

/// Default backend (SSH daemon) port.
pub const DEFAULT_BACKEND_PORT: u16 = 22;

/// Default status code sent in handshake responses.
pub const DEFAULT_HTTP_RESPONSE_CODE: u16 = 101;

/// Default connection ceiling (also the listen backlog).
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Default time allowed for the first bytes of a connection (5s).
pub const DEFAULT_SNIFF_TIMEOUT_MS: u64 = 5000;

/// Default time in-flight sessions get to finish on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 30;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines with a timestamp prefix.
    Text,
    /// One JSON object per event.
    Json,
}

/// Relay configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProxyConfig {
    /// Address to bind the listening socket to.
    pub listen_host: IpAddr,

    /// Listening port.
    pub port: u16,

    /// Backend host (IP literal or resolvable name).
    pub backend_host: String,

    /// Backend port.
    pub backend_port: u16,

    /// Status code used for upgrade and plain HTTP responses.
    pub http_response_code: u16,

    /// Banner text sent in the identifying header and plain HTTP body.
    pub custom_message: String,

    /// Name of the identifying response header.
    pub banner_header: String,

    /// Whether WebSocket upgrade requests are tunneled.
    pub websocket_enabled: bool,

    /// Maximum concurrent connections.
    pub max_connections: usize,

    /// Whether per-connection events are logged.
    pub log_connections: bool,

    /// Timeout for the protocol sniff and handshake reads (milliseconds).
    pub sniff_timeout_ms: u64,

    /// Grace period for in-flight sessions on shutdown (seconds).
    pub shutdown_grace_secs: u64,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            listen_host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            backend_host: Ipv4Addr::LOCALHOST.to_string(),
            backend_port: DEFAULT_BACKEND_PORT,
            http_response_code: DEFAULT_HTTP_RESPONSE_CODE,
            custom_message: "sshgate proxy connected".to_string(),
            banner_header: "X-Sshgate-Message".to_string(),
            websocket_enabled: true,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            log_connections: true,
            sniff_timeout_ms: DEFAULT_SNIFF_TIMEOUT_MS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// No file; built-in defaults.
    Defaults,
    /// Merged from this file over the defaults.
    File(PathBuf),
}

/// Outcome of loading configuration.
///
/// Warnings are returned rather than logged because logging itself is
/// configured from the result.
#[derive(Debug, Clone)]
pub struct ConfigLoad {
    pub config: ProxyConfig,
    pub source: ConfigSource,
    pub warnings: Vec<String>,
}

impl ProxyConfig {
    /// Load configuration from a JSON file. Never fails.
    pub fn load(path: &Path) -> ConfigLoad {
        match fs::read_to_string(path) {
            Ok(contents) => {
                let (config, warnings) = Self::from_json_str(&contents);
                ConfigLoad {
                    config,
                    source: ConfigSource::File(path.to_path_buf()),
                    warnings,
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => ConfigLoad {
                config: Self::default(),
                source: ConfigSource::Defaults,
                warnings: Vec::new(),
            },
            Err(e) => ConfigLoad {
                config: Self::default(),
                source: ConfigSource::Defaults,
                warnings: vec![format!(
                    "could not read {}: {}; using defaults",
                    path.display(),
                    e
                )],
            },
        }
    }

    /// Merge a JSON document over the defaults.
    pub fn from_json_str(contents: &str) -> (Self, Vec<String>) {
        match serde_json::from_str::<Value>(contents) {
            Ok(Value::Object(map)) => Self::merge(&map),
            Ok(other) => (
                Self::default(),
                vec![format!(
                    "config must be a JSON object, got {}; using defaults",
                    json_kind(&other)
                )],
            ),
            Err(e) => (
                Self::default(),
                vec![format!("malformed config JSON: {}; using defaults", e)],
            ),
        }
    }

    fn merge(map: &Map<String, Value>) -> (Self, Vec<String>) {
        let defaults = Self::default();
        let mut fields = FieldReader {
            map,
            warnings: Vec::new(),
        };

        let mut config = Self {
            listen_host: fields.get("listen_host", &[], defaults.listen_host),
            port: fields.get_valid("port", &[], defaults.port, |p| *p != 0, "must be non-zero"),
            backend_host: fields.get_valid(
                "backend_host",
                &[],
                defaults.backend_host,
                |h: &String| !h.trim().is_empty(),
                "must not be empty",
            ),
            backend_port: fields.get_valid(
                "backend_port",
                &["ssh_port"],
                defaults.backend_port,
                |p| *p != 0,
                "must be non-zero",
            ),
            http_response_code: fields.get_valid(
                "http_response_code",
                &[],
                defaults.http_response_code,
                |c| (100..=599).contains(c),
                "must be between 100 and 599",
            ),
            custom_message: fields.get("custom_message", &[], defaults.custom_message),
            banner_header: fields.get_valid(
                "banner_header",
                &[],
                defaults.banner_header,
                |h: &String| is_header_token(h),
                "must be a valid HTTP header name",
            ),
            websocket_enabled: fields.get("websocket_enabled", &[], defaults.websocket_enabled),
            max_connections: fields.get_valid(
                "max_connections",
                &[],
                defaults.max_connections,
                |n| *n >= 1,
                "must be at least 1",
            ),
            log_connections: fields.get("log_connections", &[], defaults.log_connections),
            sniff_timeout_ms: fields.get_valid(
                "sniff_timeout_ms",
                &[],
                defaults.sniff_timeout_ms,
                |ms| *ms >= 1,
                "must be at least 1",
            ),
            shutdown_grace_secs: fields.get(
                "shutdown_grace_secs",
                &[],
                defaults.shutdown_grace_secs,
            ),
            log_level: fields.get("log_level", &[], defaults.log_level),
            log_format: fields.get("log_format", &[], defaults.log_format),
        };

        let mut warnings = fields.warnings;

        // The banner is echoed into a header line; control characters would split it
        if config.custom_message.chars().any(char::is_control) {
            config.custom_message = config
                .custom_message
                .chars()
                .map(|c| if c.is_control() { ' ' } else { c })
                .collect();
            warnings.push("custom_message: control characters replaced with spaces".to_string());
        }

        (config, warnings)
    }

    /// Apply command-line overrides.
    pub fn with_overrides(mut self, port: Option<u16>, backend_port: Option<u16>) -> Self {
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(backend_port) = backend_port {
            self.backend_port = backend_port;
        }
        self
    }

    /// Write the default configuration as pretty JSON.
    pub fn write_default(path: &Path, force: bool) -> Result<()> {
        if path.exists() && !force {
            bail!(
                "{} already exists (use --force to overwrite)",
                path.display()
            );
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let contents = serde_json::to_string_pretty(&Self::default())?;
        fs::write(path, contents + "\n")
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Socket address of the listening socket.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.listen_host, self.port)
    }

    /// Backend address for display.
    pub fn backend_addr(&self) -> String {
        match self.backend_host.parse::<IpAddr>() {
            Ok(ip) => SocketAddr::new(ip, self.backend_port).to_string(),
            Err(_) => format!("{}:{}", self.backend_host, self.backend_port),
        }
    }

    /// Timeout for the protocol sniff and handshake reads.
    pub fn sniff_timeout(&self) -> Duration {
        Duration::from_millis(self.sniff_timeout_ms)
    }

    /// Grace period for in-flight sessions on shutdown.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Reads individual fields from a JSON object, recording fallbacks.
struct FieldReader<'a> {
    map: &'a Map<String, Value>,
    warnings: Vec<String>,
}

impl FieldReader<'_> {
    fn lookup(&self, key: &str, aliases: &[&str]) -> Option<(String, &Value)> {
        std::iter::once(key)
            .chain(aliases.iter().copied())
            .find_map(|k| self.map.get(k).map(|v| (k.to_string(), v)))
    }

    fn get<T: DeserializeOwned>(&mut self, key: &str, aliases: &[&str], default: T) -> T {
        self.get_valid(key, aliases, default, |_| true, "")
    }

    fn get_valid<T: DeserializeOwned>(
        &mut self,
        key: &str,
        aliases: &[&str],
        default: T,
        valid: impl Fn(&T) -> bool,
        requirement: &str,
    ) -> T {
        let Some((found, value)) = self.lookup(key, aliases) else {
            return default;
        };

        match serde_json::from_value::<T>(value.clone()) {
            Ok(v) if valid(&v) => v,
            Ok(_) => {
                self.warnings
                    .push(format!("{}: {}; using default", found, requirement));
                default
            }
            Err(e) => {
                self.warnings
                    .push(format!("{}: invalid value ({}); using default", found, e));
                default
            }
        }
    }
}

fn is_header_token(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.listen_addr().to_string(), "0.0.0.0:1080");
        assert_eq!(config.backend_addr(), "127.0.0.1:22");
        assert_eq!(config.http_response_code, 101);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.sniff_timeout(), Duration::from_secs(5));
        assert!(config.websocket_enabled);
        assert!(config.log_connections);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let load = ProxyConfig::load(&dir.path().join("absent.json"));
        assert_eq!(load.config, ProxyConfig::default());
        assert_eq!(load.source, ConfigSource::Defaults);
        assert!(load.warnings.is_empty());
    }

    #[test]
    fn test_partial_file_merges_over_defaults() {
        let (config, warnings) = ProxyConfig::from_json_str(
            r#"{"port": 8080, "custom_message": "hi", "websocket_enabled": false}"#,
        );
        assert!(warnings.is_empty());
        assert_eq!(config.port, 8080);
        assert_eq!(config.custom_message, "hi");
        assert!(!config.websocket_enabled);
        assert_eq!(config.backend_port, DEFAULT_BACKEND_PORT);
        assert_eq!(config.http_response_code, DEFAULT_HTTP_RESPONSE_CODE);
    }

    #[test]
    fn test_legacy_keys() {
        let (config, warnings) =
            ProxyConfig::from_json_str(r#"{"ssh_port": 2222, "socks_version": 5}"#);
        assert!(warnings.is_empty());
        assert_eq!(config.backend_port, 2222);
    }

    #[test]
    fn test_malformed_json_uses_defaults() {
        let (config, warnings) = ProxyConfig::from_json_str("{ port: ");
        assert_eq!(config, ProxyConfig::default());
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("malformed"));
    }

    #[test]
    fn test_non_object_uses_defaults() {
        let (config, warnings) = ProxyConfig::from_json_str("[1, 2]");
        assert_eq!(config, ProxyConfig::default());
        assert!(warnings[0].contains("an array"));
    }

    #[test]
    fn test_invalid_field_falls_back_individually() {
        let (config, warnings) = ProxyConfig::from_json_str(
            r#"{"port": "eighty", "backend_port": 70000, "http_response_code": 42,
                "max_connections": 0, "log_format": "json", "banner_header": "Bad Header"}"#,
        );
        assert_eq!(config.port, DEFAULT_PORT);
        assert_eq!(config.backend_port, DEFAULT_BACKEND_PORT);
        assert_eq!(config.http_response_code, DEFAULT_HTTP_RESPONSE_CODE);
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.banner_header, "X-Sshgate-Message");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(warnings.len(), 5);
    }

    #[test]
    fn test_custom_message_control_chars_replaced() {
        let (config, warnings) =
            ProxyConfig::from_json_str(r#"{"custom_message": "a\r\nX-Evil: 1"}"#);
        assert_eq!(config.custom_message, "a  X-Evil: 1");
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn test_overrides() {
        let config = ProxyConfig::default().with_overrides(Some(443), None);
        assert_eq!(config.port, 443);
        assert_eq!(config.backend_port, DEFAULT_BACKEND_PORT);
    }

    #[test]
    fn test_backend_addr_formats_ipv6_and_names() {
        let mut config = ProxyConfig::default();
        config.backend_host = "::1".to_string();
        assert_eq!(config.backend_addr(), "[::1]:22");
        config.backend_host = "localhost".to_string();
        assert_eq!(config.backend_addr(), "localhost:22");
    }

    #[test]
    fn test_write_default_then_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        ProxyConfig::write_default(&path, false).unwrap();
        let load = ProxyConfig::load(&path);
        assert_eq!(load.config, ProxyConfig::default());
        assert_eq!(load.source, ConfigSource::File(path.clone()));
        assert!(load.warnings.is_empty());

        // Refuses to clobber without force
        assert!(ProxyConfig::write_default(&path, false).is_err());
        assert!(ProxyConfig::write_default(&path, true).is_ok());
    }
}
