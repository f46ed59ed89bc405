//! LanLink CLI entry point

use clap::Parser;
use tracing::{error, info};

use lanlink_cli::{
    cli::Cli,
    commands::CommandDispatcher,
    config::{AppConfig, Overrides},
    error::Result,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let overrides = Overrides {
        config_file: cli.config.clone(),
        name: cli.name.clone(),
        download_dir: cli.download_dir.clone(),
    };
    let config = match AppConfig::load(&overrides) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    info!("Device name: {}", config.node.device_name);

    if let Err(e) = CommandDispatcher::execute(cli.command, config).await {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

/// Setup logging based on verbosity level
fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
