//! logbridge-daemon entry point.
//!
//! Loads configuration, initializes tracing, builds the orchestrator and
//! runs until a shutdown signal arrives.

use anyhow::Result;
use clap::Parser;

use logbridge_core::config::LogbridgeConfig;
use logbridge_daemon::cli::DaemonCli;
use logbridge_daemon::logging;
use logbridge_daemon::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = DaemonCli::parse();

    let mut config = LogbridgeConfig::load(&cli.config)
        .map_err(|e| anyhow::anyhow!("failed to load {}: {}", cli.config.display(), e))?;

    // CLI flags win over the config file and environment variables
    if let Some(level) = cli.log_level {
        config.general.log_level = level;
    }
    if let Some(format) = cli.log_format {
        config.general.log_format = format;
    }
    if let Some(pid_file) = cli.pid_file {
        config.general.pid_file = pid_file;
    }

    if cli.validate {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
        println!("configuration OK: {}", cli.config.display());
        return Ok(());
    }

    logging::init_tracing(&config.general)?;
    tracing::info!(
        config = %cli.config.display(),
        version = env!("CARGO_PKG_VERSION"),
        "logbridge-daemon starting"
    );

    let mut orchestrator = Orchestrator::build_from_config(config).await?;
    orchestrator.run().await?;

    tracing::info!("logbridge-daemon stopped");
    Ok(())
}
