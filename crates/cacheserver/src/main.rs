//! Cache server daemon
//!
//! Serves the line protocol over TCP with every request gated by the
//! connection security state machine.

use anyhow::{Context, Result};
use cacheserver::{Server, ServerOptions};
use clap::Parser;
use std::path::Path;
use tokio::sync::watch;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cacheserver")]
#[command(about = "In-memory cache server with connection security", long_about = None)]
struct Cli {
    /// Server configuration file path
    #[arg(
        short = 'c',
        long,
        env = "CACHESERVER_CONF",
        default_value = "/etc/cacheserver/server.conf"
    )]
    conf: String,

    /// Listen address, overrides listen_addr from the config file
    #[arg(long)]
    listen: Option<String>,

    /// Keyring path, overrides keyring from the config file
    #[arg(long)]
    keyring: Option<String>,

    /// Require clients to authenticate
    #[arg(long)]
    security: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over --debug
    let default_level = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut options = if Path::new(&cli.conf).exists() {
        debug!("Loading configuration from: {}", cli.conf);
        ServerOptions::load(&cli.conf).with_context(|| format!("Failed to load {}", cli.conf))?
    } else {
        debug!("Configuration file not found: {}", cli.conf);
        ServerOptions::default()
    };

    if let Some(listen) = cli.listen {
        options.listen_addr = listen;
    }
    if let Some(keyring) = cli.keyring {
        options.keyring = keyring;
    }
    if cli.security {
        options.security_enabled = true;
    }

    let config = options
        .to_server_config()
        .context("Failed to build server configuration")?;
    let server = Server::bind(config).await.context("Failed to start server")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, shutting down");
        }
        let _ = shutdown_tx.send(true);
    });

    server.run(shutdown_rx).await?;
    Ok(())
}
