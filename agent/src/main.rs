//! fleet-agent entry point.
//!
//! Installs the rustls crypto provider, initialises tracing from `RUST_LOG`
//! and runs the selected subcommand. Configuration comes from `FLEET_*`
//! environment variables.

use clap::Parser;
use fleet_agent::cli::Cli;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Ignore the error if a provider is already installed.
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(e) = cli.run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
