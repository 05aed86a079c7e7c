// ABOUTME: CLI entry point for aquatest-sync
// ABOUTME: Runs a synchronisation into a local SQLite mirror and manages the stored watermark

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use aquatest_sync::engine::ChannelReporter;
use aquatest_sync::feed::HttpChangeFeed;
use aquatest_sync::state::{self, AppState};
use aquatest_sync::{Config, SqliteStore, SyncEngine, SyncEvent, SyncOutcome, Watermark};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "aquatest-sync")]
#[command(about = "Incrementally synchronise a local AquaTest database with the update server", long_about = None)]
#[command(version)]
struct Cli {
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log: String,
    /// Path to config.toml (defaults to ~/.aquatest-sync/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    /// Path to the watermark state file (defaults to ~/.aquatest-sync/state.json)
    #[arg(long, global = true, value_name = "PATH")]
    state: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pull every change since the last completed update into the local database
    Sync {
        /// Local SQLite database to update
        #[arg(long, value_name = "PATH")]
        db: PathBuf,
        /// Ignore the stored watermark and download everything
        #[arg(long)]
        full: bool,
    },
    /// Show when the last update completed and whether another is due
    Status,
    /// Forget the stored watermark so the next sync downloads everything
    Reset,
}

fn init_tracing(filter: &str) {
    // RUST_LOG wins over --log; an unusable filter falls back to info
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log);

    let state_path = match cli.state {
        Some(path) => path,
        None => state::default_state_path()?,
    };

    match cli.command {
        Commands::Sync { db, full } => {
            let config = Config::load_or_default(cli.config.as_deref())?;
            sync(&config, &state_path, &db, full).await
        }
        Commands::Status => {
            let config = Config::load_or_default(cli.config.as_deref())?;
            status(&config, &state_path)
        }
        Commands::Reset => reset(&state_path),
    }
}

async fn sync(config: &Config, state_path: &Path, db: &Path, full: bool) -> Result<()> {
    let mut app_state = state::load_from(state_path)?;
    let since = if full {
        Watermark::epoch()
    } else {
        app_state.since()
    };

    let store = SqliteStore::open(db)?;
    let feed = Arc::new(HttpChangeFeed::new(&config.server)?);
    let engine = SyncEngine::new(Arc::clone(&feed), feed, config.policy.clone());

    let (reporter, mut events) = ChannelReporter::new();
    let handle = engine.spawn(store, since, reporter);

    let cancel = handle.cancel_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Received Ctrl+C, cancelling update");
            cancel.cancel();
        }
    });

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::default_spinner().template("{spinner} [{elapsed_precise}] {msg}")?);
    spinner.enable_steady_tick(Duration::from_millis(120));

    // The channel closes once the engine task drops its reporter
    let mut phase = String::new();
    while let Some(event) = events.recv().await {
        match &event {
            SyncEvent::PhaseStarted { .. } => {
                phase = event.to_string();
                spinner.set_message(phase.clone());
            }
            SyncEvent::RowApplied { .. } => spinner.set_message(format!("{} {}", phase, event)),
            SyncEvent::TableListLoaded { .. } => spinner.set_message(event.to_string()),
            _ => {}
        }
    }

    let (outcome, _store) = handle
        .join()
        .await
        .context("Synchronisation task stopped unexpectedly")?;

    match outcome {
        SyncOutcome::Completed { watermark, stats } => {
            spinner.finish_with_message("Update complete!");
            app_state.last_update = Some(watermark);
            state::save_to(state_path, &app_state)?;

            println!();
            println!("Update complete:");
            println!("  Tables synced: {}", stats.tables_synced);
            println!("  Rows added: {}", stats.rows_added);
            println!("  Rows updated: {}", stats.rows_updated);
            println!("  Rows deleted: {}", stats.rows_deleted);
            if !stats.skipped_phases.is_empty() {
                println!("  Skipped phases: {}", stats.skipped_phases.join(", "));
            }
            println!("  Duration: {}ms", stats.duration_ms);
            Ok(())
        }
        SyncOutcome::Cancelled { .. } => {
            spinner.abandon_with_message("Update cancelled!");
            bail!("Update cancelled, the local database was left unchanged")
        }
        SyncOutcome::Failed { message, .. } => {
            spinner.abandon_with_message("Update failed");
            bail!("{}", message)
        }
    }
}

fn status(config: &Config, state_path: &Path) -> Result<()> {
    let app_state = state::load_from(state_path)?;
    match app_state.last_update {
        Some(watermark) => println!("Last update: {}", watermark),
        None => println!("Last update: never"),
    }
    let due = app_state.is_update_due(Watermark::now(), config.update_check_period());
    println!("Update due: {}", if due { "yes" } else { "no" });
    Ok(())
}

fn reset(state_path: &Path) -> Result<()> {
    let app_state = AppState::default();
    state::save_to(state_path, &app_state)?;
    println!("Watermark cleared; the next sync will download everything.");
    Ok(())
}
