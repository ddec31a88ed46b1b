//! tremium node
//!
//! Runs node maintenance against the hub and manages the coordination store
//! shared with the data producer.

use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use tracing::{info, warn};
use tremium_core::logging::init_logging;
use tremium_core::maintenance::parse_manifest;
use tremium_core::MaintenanceOrchestrator;
use tremium_store::{CoordinationStore, FileStore};

mod config;

use config::Config;

#[derive(Parser)]
#[command(name = "tremium-node", version)]
#[command(about = "Node-side maintenance for tremium", long_about = None)]
struct Cli {
    /// Configuration file (defaults to TREMIUM_NODE_CONFIG or node.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one maintenance pass against the hub
    Maintain,
    /// Run maintenance on the configured interval until interrupted
    Watch,
    /// Append standard input to the live data file under the data file lock
    Append,
    /// Print the pending update manifest
    Manifest,
    /// Inspect or change the coordination store
    Store {
        #[command(subcommand)]
        command: StoreCommands,
    },
}

#[derive(Subcommand)]
enum StoreCommands {
    /// Reset flags on first use of a store
    Init,
    /// Print flags and queue length as JSON
    Status,
    /// Turn data collection on
    StartCollection,
    /// Turn data collection off
    StopCollection,
    /// Queue an export request
    PushExport { request: String },
    /// Take the oldest export request
    PopExport,
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

    let store: Arc<dyn CoordinationStore> = Arc::new(FileStore::open(&config.node.store_path)?);

    match cli.command {
        Commands::Maintain => {
            let orchestrator = orchestrator(&config, store)?;
            if let Some(report) = orchestrator.run().await {
                println!(
                    "uploaded {} files, {} updates, {} skipped",
                    report.uploaded.len(),
                    report.entries.len(),
                    report.skipped.len()
                );
            }
        }
        Commands::Watch => watch(&config, store).await?,
        Commands::Append => {
            let mut bytes = Vec::new();
            std::io::stdin().read_to_end(&mut bytes)?;
            let orchestrator = orchestrator(&config, store)?;
            orchestrator
                .data_file()
                .append(orchestrator.lock(), &bytes)
                .await?;
        }
        Commands::Manifest => match std::fs::read_to_string(&config.node.manifest_path) {
            Ok(contents) => {
                for entry in parse_manifest(&contents) {
                    println!("{entry}");
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                println!("no pending updates");
            }
            Err(e) => return Err(e.into()),
        },
        Commands::Store { command } => store_command(store.as_ref(), command).await?,
    }

    Ok(())
}

/// Orchestrator that never uploads the log file this process writes to
fn orchestrator(config: &Config, store: Arc<dyn CoordinationStore>) -> Result<MaintenanceOrchestrator> {
    let mut orchestrator = MaintenanceOrchestrator::new(&config.node, store)?;
    if let Some(log_file) = &config.log.file {
        orchestrator = orchestrator.exclude_from_upload(log_file);
    }
    Ok(orchestrator)
}

async fn watch(config: &Config, store: Arc<dyn CoordinationStore>) -> Result<()> {
    let orchestrator = orchestrator(config, store)?;
    let mut ticker = tokio::time::interval(config.node.check_interval());
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    info!(interval = ?config.node.check_interval(), "watching for maintenance");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                orchestrator.run().await;
            }
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "failed to listen for ctrl-c");
                }
                info!("interrupt received, stopping");
                return Ok(());
            }
        }
    }
}

async fn store_command(store: &dyn CoordinationStore, command: StoreCommands) -> Result<()> {
    match command {
        StoreCommands::Init => {
            if store.initialize().await? {
                println!("store initialized");
            } else {
                println!("store already initialized");
            }
        }
        StoreCommands::Status => {
            let snapshot = store.snapshot().await?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        StoreCommands::StartCollection => store.start_data_collection().await?,
        StoreCommands::StopCollection => store.stop_data_collection().await?,
        StoreCommands::PushExport { request } => store.push_export_request(&request).await?,
        StoreCommands::PopExport => match store.pop_export_request().await? {
            Some(request) => println!("{request}"),
            None => println!("no export requests"),
        },
    }
    Ok(())
}
