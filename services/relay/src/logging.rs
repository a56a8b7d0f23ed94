//! Logging initialization.
//!
//! `RUST_LOG` wins when set; otherwise the configured level applies. With
//! `log_connections` disabled, per-connection events are capped at warn.

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{LogFormat, ProxyConfig};

/// Tracing target of per-connection events.
pub const CONNECTION_TARGET: &str = "sshgate_relay::proxy";

/// Build the filter for the given configuration.
pub fn build_filter(config: &ProxyConfig) -> Result<EnvFilter> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)
            .unwrap_or_else(|_| EnvFilter::new("info")),
    };

    if config.log_connections {
        return Ok(filter);
    }

    Ok(filter.add_directive(format!("{}=warn", CONNECTION_TARGET).parse()?))
}

/// Install the global subscriber.
pub fn init(config: &ProxyConfig) -> Result<()> {
    let filter = build_filter(config)?;

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()?,
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_events_capped_when_disabled() {
        let config = ProxyConfig {
            log_connections: false,
            ..ProxyConfig::default()
        };
        let filter = build_filter(&config).unwrap();
        assert!(filter.to_string().contains("sshgate_relay::proxy=warn"));
    }

    #[test]
    fn test_invalid_level_falls_back() {
        let config = ProxyConfig {
            log_level: "not a level[".to_string(),
            ..ProxyConfig::default()
        };
        assert!(build_filter(&config).is_ok());
    }
}
