//! civtrack-sync - civic dataset synchronizer
//!
//! One-shot subcommands run a single sync and print its JSON report; `serve`
//! exposes the same operations over HTTP.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use civtrack_common::config::{ensure_root_folder, resolve_root_folder, TomlConfig};
use civtrack_common::events::EventBus;
use serde::Serialize;
use std::path::PathBuf;
use tokio::signal;
use tracing::info;

use civtrack_sync::models::{DeathDateOptions, SyncOptions, SyncReport};
use civtrack_sync::{AppState, SyncEngine};

#[derive(Parser, Debug)]
#[command(name = "civtrack-sync")]
#[command(about = "Synchronize ballots, votes and death dates into the local civic store")]
#[command(version)]
struct Args {
    /// Folder holding the database
    #[arg(short, long, global = true)]
    root_folder: Option<PathBuf>,

    /// TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync one session's ballots and votes
    SyncBallots {
        /// Legislative session number
        #[arg(long)]
        session: u32,
        /// Fetch and resolve without writing
        #[arg(long)]
        dry_run: bool,
        /// Only process the first N ballots
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Sync death dates from the knowledge graph
    SyncDeathDates {
        #[arg(long)]
        dry_run: bool,
        /// Close current mandates of deceased persons afterwards
        #[arg(long)]
        update_mandates: bool,
    },
    /// Close current mandates of every deceased person
    CloseMandates,
    /// Print dataset counts and the last run
    Stats,
    /// Serve the HTTP API
    Serve {
        /// Overrides server.bind_address
        #[arg(long, env = "CIVTRACK_BIND")]
        bind: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = TomlConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    civtrack_common::logging::init(&config.logging.level)?;

    info!("Starting civtrack-sync {}", env!("CARGO_PKG_VERSION"));

    let root_folder = resolve_root_folder(args.root_folder.as_deref(), &config);
    let db_path = ensure_root_folder(&root_folder)
        .with_context(|| format!("Failed to initialize root folder {}", root_folder.display()))?;
    info!("Database: {}", db_path.display());

    let db_pool = civtrack_sync::db::init_database_pool(&db_path, config.database.max_connections).await?;
    let event_bus = EventBus::new(100);
    let engine = SyncEngine::from_config(db_pool, &config, event_bus)?;

    match args.command {
        Command::SyncBallots {
            session,
            dry_run,
            limit,
        } => {
            let options = SyncOptions {
                session,
                dry_run,
                limit,
            };
            let report = engine
                .sync_ballots_with_progress(&options, &|percentage, message| {
                    info!(percentage, "{}", message);
                })
                .await;
            print_report(&report)
        }
        Command::SyncDeathDates {
            dry_run,
            update_mandates,
        } => {
            let options = DeathDateOptions {
                dry_run,
                update_mandates,
            };
            let report = engine.sync_death_dates(&options).await;
            print_report(&report)
        }
        Command::CloseMandates => {
            let closed = engine.close_mandates().await?;
            println!("{}", serde_json::json!({ "mandates_closed": closed }));
            Ok(())
        }
        Command::Stats => {
            let stats = engine.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
        Command::Serve { bind } => {
            let addr = bind.unwrap_or_else(|| config.server.bind_address.clone());
            serve(engine, &addr).await
        }
    }
}

/// Print the report; a run that could not start is a failed command
fn print_report<S: Serialize>(report: &SyncReport<S>) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    if !report.success {
        anyhow::bail!(
            "Sync failed: {}",
            report.errors.first().map(String::as_str).unwrap_or("unknown error")
        );
    }
    Ok(())
}

async fn serve(engine: SyncEngine, addr: &str) -> Result<()> {
    engine
        .close_interrupted_runs()
        .await
        .context("Failed to close interrupted runs")?;

    let app = civtrack_sync::build_router(AppState::new(engine));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Listening on http://{}", addr);
    info!("Health check: http://{}/health", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received terminate signal, shutting down"),
    }
}
