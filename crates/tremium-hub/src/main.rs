//! tremium hub
//!
//! Serves node maintenance connections: offers image updates and stores
//! uploaded data and log files.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing::{info, warn};
use tremium_core::logging::init_logging;
use tremium_core::{purge_expired, Acceptor, ConnectionHandler, RetentionSchedule};

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "tremium-hub", version)]
#[command(about = "Update and data exchange point for tremium nodes", long_about = None)]
struct Cli {
    /// Configuration file (defaults to TREMIUM_HUB_CONFIG or hub.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Accept node connections until interrupted
    Serve,
    /// Delete expired files from the transfer directory once
    Purge {
        /// Override the configured maximum age
        #[arg(long)]
        max_age_days: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };
    init_logging(&config.log)?;

    match cli.command {
        Commands::Serve => serve(config).await,
        Commands::Purge { max_age_days } => {
            let max_age_days = max_age_days.unwrap_or(config.hub.retention.max_age_days);
            let deleted = purge_expired(&config.hub.file_transfer_dir, max_age_days)?;
            println!("deleted {deleted} expired files");
            Ok(())
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    let hub = config.hub;
    std::fs::create_dir_all(&hub.image_archive_dir)?;
    std::fs::create_dir_all(&hub.file_transfer_dir)?;

    let handler = ConnectionHandler::from_config(&hub)?;
    let acceptor = Acceptor::bind(&hub.bind, handler, hub.max_connections).await?;
    info!(addr = %acceptor.local_addr()?, "tremium hub listening");

    let retention = hub.retention.enabled.then(|| {
        RetentionSchedule::new(
            &hub.file_transfer_dir,
            hub.retention.max_age_days,
            hub.retention.purge_interval(),
        )
        .spawn()
    });

    let result = acceptor
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
            info!("interrupt received");
        })
        .await;

    if let Some(retention) = retention {
        retention.abort();
    }
    result?;
    Ok(())
}
