//! sqlbridge-connect - bridge runtime
//!
//! # Usage
//!
//! ```bash
//! # Connect to the platform and serve requests (default)
//! sqlbridge-connect -c sqlbridge.yaml
//!
//! # Validate configuration
//! sqlbridge-connect -c sqlbridge.yaml validate
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sqlbridge_rdbc::postgres::PgConnectionFactory;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use sqlbridge_connect::config::{BridgeConfig, DEFAULT_CONFIG_FILE};
use sqlbridge_connect::transport::TcpPlatform;
use sqlbridge_connect::{Connector, ConnectorSettings};

/// Inbound events buffered between the transport and the run loop
const EVENT_BUFFER: usize = 256;

#[derive(Parser)]
#[command(name = "sqlbridge-connect")]
#[command(version, about = "Bridge between an orchestration platform and a relational database")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the platform and serve requests (default)
    Run,
    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = BridgeConfig::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Validate => validate_config(&config),
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

fn validate_config(config: &BridgeConfig) -> Result<()> {
    println!("Configuration is valid");
    println!("  platform: {}", config.platform.url);
    println!("  source:   {}", config.platform.source);
    match config.platform.max_connect_attempts {
        Some(max) => println!("  connect attempts: {max}"),
        None => println!("  connect attempts: unbounded"),
    }
    Ok(())
}

async fn run(config: BridgeConfig) -> Result<()> {
    info!(
        platform = %config.platform.url,
        source = %config.platform.source,
        "Starting sqlbridge-connect"
    );

    let (platform, events) = TcpPlatform::new(&config.platform, EVENT_BUFFER);
    let connector = Connector::new(
        platform,
        Arc::new(PgConnectionFactory),
        ConnectorSettings::from(&config),
    );

    let shutdown = connector.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal");
        shutdown.cancel();
    });

    if let Err(e) = connector.run(events).await {
        error!(error = %e, "Connector stopped");
        return Err(e).context("Connector failed");
    }

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
