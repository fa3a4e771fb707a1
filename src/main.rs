use anyhow::{Context, Result};
use camrelay::{Relay, RelayConfig};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Relay live camera frames from upstream sources to WebSocket viewers.
#[derive(Debug, Parser)]
#[command(name = "camrelay", version, about)]
struct Cli {
    /// YAML configuration file; built-in defaults are used when omitted
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(short, long)]
    verbose: bool,

    /// Validate the configuration, print it and exit
    #[arg(long)]
    check: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "camrelay=debug" } else { "camrelay=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match &cli.config {
        Some(path) => RelayConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => RelayConfig::default(),
    };

    if cli.check {
        config.validate().context("Invalid configuration")?;
        print!("{}", config.to_yaml()?);
        return Ok(());
    }

    for camera in &config.cameras {
        info!(
            camera = %camera.id,
            source = %camera.source_endpoint(),
            port = camera.broadcast_port,
            "{}",
            camera.name
        );
    }

    let relay = Relay::start(config).await.context("Failed to start relay")?;

    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    relay.shutdown().await;
    Ok(())
}
