//! Command-line interface.

use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::config::{ConfigLoad, ConfigSource, ProxyConfig, DEFAULT_CONFIG_PATH};
use crate::{logging, server};

/// sshgate - tunnel SOCKS5, WebSocket and raw clients to a local SSH daemon.
#[derive(Debug, Parser)]
#[command(name = "sshgate")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, global = true, env = "SSHGATE_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Listening port (overrides the config file).
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Backend port (overrides the config file).
    #[arg(long, global = true)]
    backend_port: Option<u16>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the relay (default).
    Run,

    /// Write the default configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration as JSON.
    ShowConfig,
}

impl Cli {
    /// Run the selected command.
    pub async fn run(self) -> Result<()> {
        let Cli {
            config: path,
            port,
            backend_port,
            command,
        } = self;

        match command.unwrap_or(Commands::Run) {
            Commands::Run => {
                let load = load_config(&path, port, backend_port);
                logging::init(&load.config)?;
                report_load(&load);
                server::serve(load.config).await
            }
            Commands::InitConfig { force } => {
                ProxyConfig::write_default(&path, force)?;
                println!("Wrote default configuration to {}", path.display());
                Ok(())
            }
            Commands::ShowConfig => {
                let load = load_config(&path, port, backend_port);
                for warning in &load.warnings {
                    eprintln!("warning: {}", warning);
                }
                println!("{}", serde_json::to_string_pretty(&load.config)?);
                Ok(())
            }
        }
    }
}

fn load_config(path: &Path, port: Option<u16>, backend_port: Option<u16>) -> ConfigLoad {
    let mut load = ProxyConfig::load(path);
    load.config = load.config.with_overrides(port, backend_port);
    load
}

fn report_load(load: &ConfigLoad) {
    match &load.source {
        ConfigSource::File(path) => info!(path = %path.display(), "Configuration loaded"),
        ConfigSource::Defaults => info!("No configuration file; using defaults"),
    }
    for warning in &load.warnings {
        warn!("Config: {}", warning);
    }
}
