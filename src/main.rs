// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Segment-Backfill CLI
//!
//! Fetches Strava segment efforts and segment details into a local SQLite
//! store, one rate-limited cycle at a time.

use anyhow::Context;
use clap::{Parser, Subcommand};
use segment_backfill::{
    config::Config,
    db::{RecordStore, SqliteStore},
    error::BackfillError,
    models::BackfillReport,
    services::{
        BackfillConfig, BackfillMode, BackfillRunner, FileTokenStore, RateLimiter, ScheduleConfig,
        ScheduleMode, Scheduler, StateFile, StravaClient, TokenManager,
    },
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "segment-backfill")]
#[command(version, about = "Incremental Strava segment backfill", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// SQLite database path
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Backfill state file path
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Token file path
    #[arg(long, global = true)]
    tokens: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run backfill cycles
    Run {
        /// Phases to run: efforts, segments, or both
        #[arg(long, default_value = "both")]
        mode: BackfillMode,

        /// Activities per cycle in the effort phase
        #[arg(long, default_value = "10")]
        activities: usize,

        /// Segments per cycle in the detail phase
        #[arg(long, default_value = "20")]
        segments: usize,

        /// Keep running cycles at a fixed interval
        #[arg(long)]
        continuous: bool,

        /// Seconds between cycle starts in continuous mode
        #[arg(long, default_value = "300")]
        interval: u64,

        /// Stop after this many cycles (0 = unlimited)
        #[arg(long, default_value = "0")]
        max_runs: u64,

        /// Stop once a cycle finds nothing to do
        #[arg(long)]
        exit_when_drained: bool,
    },

    /// Fetch new activities from Strava into the store
    SyncActivities {
        /// Maximum number of activities to fetch
        #[arg(long, default_value = "50")]
        limit: usize,
    },

    /// Show backfill and database statistics
    Stats,

    /// Mark an activity's segment efforts as processed without fetching
    MarkProcessed {
        /// Strava activity ID
        activity_id: u64,
    },

    /// Reset the backfill state file
    ResetState,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Load configuration (and .env) before logging so LOG_FORMAT applies
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };
    init_logging();

    match run(cli, config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(err) = e.downcast_ref::<BackfillError>() {
                if err.is_reauthorization_required() {
                    tracing::error!(error = %err, "Strava re-authorization required");
                    eprintln!("Re-authorization required: {}", err);
                    return ExitCode::from(2);
                }
            }
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli, mut config: Config) -> anyhow::Result<()> {
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(state) = cli.state {
        config.state_path = state;
    }
    if let Some(tokens) = cli.tokens {
        config.token_path = tokens;
    }

    match cli.command {
        Commands::Run {
            mode,
            activities,
            segments,
            continuous,
            interval,
            max_runs,
            exit_when_drained,
        } => {
            let backfill = BackfillConfig {
                mode,
                activities_batch: activities,
                segments_batch: segments,
                ..Default::default()
            };
            let schedule = ScheduleConfig {
                mode: if continuous {
                    ScheduleMode::Continuous
                } else {
                    ScheduleMode::OneTime
                },
                interval: Duration::from_secs(interval),
                max_runs,
                exit_when_drained,
            };
            run_backfill(&config, backfill, schedule).await
        }
        Commands::SyncActivities { limit } => {
            let cancel = install_shutdown_handler();
            let store = Arc::new(SqliteStore::open(&config.db_path)?);
            let mut runner =
                build_runner(&config, store, BackfillConfig::default(), cancel).await?;
            let summary = runner.sync_activities(limit).await?;
            println!(
                "Fetched {} activities ({} new, {} already stored) in {} pages",
                summary.fetched, summary.inserted, summary.existing, summary.pages
            );
            if summary.interrupted {
                println!("Sync stopped early on a transient error; run again to continue");
            }
            Ok(())
        }
        Commands::Stats => {
            let store = SqliteStore::open(&config.db_path)?;
            let state = StateFile::new(&config.state_path).load()?;
            let report = BackfillReport {
                state,
                store: store.stats()?,
            };
            print!("{}", report);
            Ok(())
        }
        Commands::MarkProcessed { activity_id } => {
            let store = SqliteStore::open(&config.db_path)?;
            if store.mark_activity_processed(activity_id)? {
                println!("Marked activity {} as processed", activity_id);
                Ok(())
            } else {
                anyhow::bail!("Activity {} not found in {}", activity_id, config.db_path.display())
            }
        }
        Commands::ResetState => {
            StateFile::new(&config.state_path).reset()?;
            println!("Reset backfill state at {}", config.state_path.display());
            Ok(())
        }
    }
}

async fn run_backfill(
    config: &Config,
    backfill: BackfillConfig,
    schedule: ScheduleConfig,
) -> anyhow::Result<()> {
    let cancel = install_shutdown_handler();
    let store = Arc::new(
        SqliteStore::open(&config.db_path)
            .with_context(|| format!("Failed to open {}", config.db_path.display()))?,
    );
    tracing::info!(
        db = %config.db_path.display(),
        mode = %backfill.mode,
        activities = backfill.activities_batch,
        segments = backfill.segments_batch,
        "Starting segment backfill"
    );

    let mut runner = build_runner(config, store.clone(), backfill, cancel.clone()).await?;
    let scheduler = Scheduler::new(schedule, cancel);
    let report = scheduler.run(&mut runner).await?;

    if let Some(summary) = &report.last_summary {
        println!("{}", summary);
    }
    println!(
        "Completed {} cycle(s), stopped: {:?}",
        report.cycles, report.stop_reason
    );
    println!();
    print!(
        "{}",
        BackfillReport {
            state: runner.state().clone(),
            store: store.stats()?,
        }
    );
    Ok(())
}

async fn build_runner(
    config: &Config,
    store: Arc<SqliteStore>,
    backfill: BackfillConfig,
    cancel: CancellationToken,
) -> anyhow::Result<BackfillRunner> {
    let client = Arc::new(StravaClient::new(config.credentials.clone()));
    let provider =
        Arc::new(FileTokenStore::new(&config.token_path).with_fallback(config.env_token()));

    let tokens = TokenManager::load(provider, client.clone())
        .await
        .map_err(BackfillError::from)?;

    let runner = BackfillRunner::new(
        client,
        store,
        tokens,
        RateLimiter::new(config.rate_limit),
        StateFile::new(&config.state_path),
        backfill,
    )?
    .with_cancellation(cancel);
    Ok(runner)
}

/// Cancel on Ctrl-C or SIGTERM. In-flight writes finish before the runner stops.
fn install_shutdown_handler() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });
    cancel
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
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
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl-C, finishing current record");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, finishing current record");
        }
    }
}

/// Initialize logging: JSON when `LOG_FORMAT=json`, human-readable otherwise.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("segment_backfill=debug,info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(false)
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .init();
    }
}
