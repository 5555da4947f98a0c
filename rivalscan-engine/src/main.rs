//! Rivalscan engine - main entry point
//!
//! Loads configuration, opens the database, wires the collaborators and
//! serves the scan API until shutdown.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rivalscan_common::db::init_database;
use rivalscan_common::events::EventBus;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use rivalscan_engine::api::{self, AppState};
use rivalscan_engine::db::ScanStore;
use rivalscan_engine::{Collaborators, EngineConfig, OrchestratorContext};

const DATABASE_FILE: &str = "rivalscan.db";

/// Command-line arguments for rivalscan-engine
#[derive(Parser, Debug)]
#[command(name = "rivalscan-engine")]
#[command(about = "Competitive intelligence scan engine")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Root folder holding the database
    #[arg(short, long)]
    root_folder: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Configuration is loaded before logging so its level can seed the filter
    let config = EngineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting rivalscan-engine v{}", env!("CARGO_PKG_VERSION"));

    let root_folder = config.root_folder(args.root_folder.as_deref());
    std::fs::create_dir_all(&root_folder)
        .with_context(|| format!("Failed to create root folder {}", root_folder.display()))?;
    info!("Root folder: {}", root_folder.display());

    let db_path = root_folder.join(DATABASE_FILE);
    let pool = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    info!("Database ready at {}", db_path.display());

    let collaborators = Collaborators::from_config(&config).context("Failed to build collaborators")?;
    let events = EventBus::new(config.scan.event_capacity);
    let orchestrator = Arc::new(OrchestratorContext::new(
        &config,
        collaborators,
        events,
        Some(ScanStore::new(pool)),
    ));

    api::server::run(&config.server, AppState::new(orchestrator))
        .await
        .context("HTTP server failed")?;

    info!("Shutdown complete");
    Ok(())
}
