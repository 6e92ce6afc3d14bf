//! `moonphase` - Timer-driven werewolf session server

use std::sync::Arc;

use chrono::Utc;
use clap::Parser;
use tracing::{info, warn};

use moonphase::cli::Cli;
use moonphase::config::Config;
use moonphase::engine::GameEngine;
use moonphase::error::{ExitCode, MoonphaseError};
use moonphase::observability::init_logging;
use moonphase::scheduler::PhaseScheduler;
use moonphase::store::{SnapshotFile, StateStore};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if !cli.quiet {
        init_logging(cli.log_format, cli.verbose, cli.color);
    }

    match run(cli).await {
        Ok(()) => std::process::exit(ExitCode::SUCCESS),
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<(), MoonphaseError> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(snapshot) = cli.snapshot {
        config.snapshot_path = snapshot;
    }
    config.validate()?;

    let snapshot = SnapshotFile::with_retry_policy(
        &config.snapshot_path,
        config.persistence.write_retries,
        config.write_backoff(),
    );
    let store = Arc::new(StateStore::open(snapshot).await?);
    let scheduler = Arc::new(PhaseScheduler::new(
        Arc::clone(&store),
        config.phase_durations(),
        config.scheduler_retry_interval(),
    ));
    let engine = GameEngine::new(store, scheduler);

    let report = engine.restore_timers().await;
    info!(
        sessions = engine.session_count(),
        resolved = report.resolved,
        rearmed = report.rearmed,
        "server ready"
    );

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    let mut sweep = tokio::time::interval(config.sweep_interval());
    sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    sweep.tick().await; // first tick fires immediately

    let code = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break ExitCode::INTERRUPTED,
            _ = sigterm.recv() => break ExitCode::TERMINATED,
            _ = sweep.tick() => {
                match engine.purge_expired(config.max_session_age(), Utc::now()).await {
                    Ok(removed) if !removed.is_empty() => {
                        info!(count = removed.len(), "cleanup sweep removed sessions");
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "cleanup sweep failed"),
                }
            }
        }
    };

    info!("shutting down");
    engine.shutdown();
    std::process::exit(code);
}
