//! Avatalk - real-time AI avatar session client
//!
#![doc = "Avatalk - real-time AI avatar session client"]
#![doc = "Main entry point for the Avatalk command-line client."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use avatalk::cli::{Cli, Commands};
use avatalk::commands;
use avatalk::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    // Initialize tracing
    init_tracing(cli.verbose, cli.json_logs);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;

    // Validate configuration
    config.validate()?;

    // Execute command
    match cli.command {
        Commands::Provision { duration } => {
            tracing::info!("Requesting a new avatar stream");
            commands::provision::run_provision(&config, duration).await?;
            Ok(())
        }
        Commands::Proxy { bind } => {
            tracing::info!("Starting stream proxy");
            if let Some(b) = &bind {
                tracing::debug!("Using bind override: {}", b);
            }
            commands::proxy::run_proxy(config, bind).await?;
            Ok(())
        }
        Commands::Chat { loopback } => {
            if loopback {
                tracing::debug!("Loopback provisioning enabled");
            }
            commands::chat::run_chat(config, loopback).await?;
            Ok(())
        }
        Commands::Type { file } => {
            commands::r#type::run_type(&config, file.as_deref()).await?;
            Ok(())
        }
    }
}

/// Initialize tracing subscriber with environment filter
///
/// Logs go to stderr so command output on stdout stays clean.
fn init_tracing(verbose: bool, json: bool) {
    let default_level = if verbose { "avatalk=debug" } else { "avatalk=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(env_filter);
    if json {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}
