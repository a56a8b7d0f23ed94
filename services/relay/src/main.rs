//! sshgate - protocol-sniffing relay to a local SSH daemon.

use anyhow::Result;
use clap::Parser;

use sshgate_relay::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = cli.run().await {
        eprintln!("error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}
