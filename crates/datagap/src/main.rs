// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Change-id gap detector CLI
//!
//! Drives gap detection cycles against a SQLite change log.
//!
//! # Usage
//!
//! ```bash
//! # Create the database and capture some changes
//! datagap --db datagap.db init
//! datagap --db datagap.db capture orders --count 100 --skip 3
//!
//! # Run a single cycle, or one every 5 seconds
//! datagap --db datagap.db cycle
//! datagap --db datagap.db run --interval-secs 5
//!
//! # Inspect the gap set
//! datagap --db datagap.db gaps --json
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use datagap::{
    Clock, ContextKey, ContextStore, CycleReport, DetectorConfig, DetectorStatsSnapshot, Gap,
    GapDetector, GapStore, ProbeOutcome, SqliteGapStore,
};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

type Detector = GapDetector<SqliteGapStore, SqliteGapStore, SqliteGapStore>;

#[derive(ValueEnum, Debug, Clone, Copy)]
enum Toggle {
    On,
    Off,
}

/// Change-id gap detector
#[derive(Parser, Debug)]
#[command(name = "datagap")]
#[command(about = "Change-id gap detector - tracks missing id ranges across routing cycles")]
#[command(version)]
struct Args {
    /// Database path (SQLite file)
    #[arg(short, long, default_value = "datagap.db", global = true)]
    db: String,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the database schema
    Init,

    /// Append change rows to the change log
    Capture {
        /// Table name recorded with each change
        table: String,

        /// Number of changes
        #[arg(short = 'n', long, default_value_t = 10)]
        count: usize,

        /// Ids to leave unused before the new changes
        #[arg(long, default_value_t = 0)]
        skip: usize,

        /// Commit one change with this exact id instead
        #[arg(long, conflicts_with_all = ["count", "skip"])]
        id: Option<i64>,
    },

    /// Run one detection cycle
    Cycle {
        /// Maximum changes read per cycle
        #[arg(short, long, default_value_t = 10_000)]
        batch_size: usize,
    },

    /// Run detection cycles until Ctrl+C
    Run {
        /// Delay between cycles (seconds)
        #[arg(short, long, default_value_t = 10)]
        interval_secs: u64,

        /// Maximum changes read per cycle
        #[arg(short, long, default_value_t = 10_000)]
        batch_size: usize,

        /// Statistics reporting interval (cycles, 0 to disable)
        #[arg(long, default_value_t = 10)]
        stats_every: u64,
    },

    /// List persisted gaps
    Gaps {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show gap set summary
    Stats,

    /// Turn full gap analysis on or off
    FullAnalysis {
        #[arg(value_enum)]
        state: Toggle,
    },

    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "datagap.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Subcommands that need no database
    let command = match args.command {
        Commands::GenConfig { output } => return cmd_gen_config(output),
        Commands::Validate { config } => return cmd_validate(config),
        command => command,
    };

    let store = SqliteGapStore::new(&args.db)?;

    match command {
        Commands::Init => {
            println!("Initialized {}", args.db);
        }
        Commands::Capture {
            table,
            count,
            skip,
            id,
        } => match id {
            Some(id) => {
                store.insert_data_id(id, &table)?;
                println!("Captured change {} for '{}'", id, table);
            }
            None => {
                let ids = store.capture(&table, count, skip)?;
                match (ids.first(), ids.last()) {
                    (Some(first), Some(last)) => {
                        println!("Captured {} changes for '{}': {}..={}", ids.len(), table, first, last)
                    }
                    _ => println!("Nothing captured"),
                }
            }
        },
        Commands::Cycle { batch_size } => {
            let mut detector = build_detector(args.config.as_ref(), &store)?;
            let report = run_cycle(&mut detector, &store, batch_size)?;
            print_report(&report);
        }
        Commands::Run {
            interval_secs,
            batch_size,
            stats_every,
        } => {
            let detector = build_detector(args.config.as_ref(), &store)?;
            run_loop(detector, store, interval_secs, batch_size, stats_every).await?;
        }
        Commands::Gaps { json } => {
            let gaps = store.load_gaps()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&gaps)?);
            } else {
                println!("{} gaps:", gaps.len());
                for gap in &gaps {
                    println!("  {} size={} created={}", gap, gap.size(), gap.created_at);
                }
            }
        }
        Commands::Stats => {
            let summary = StoreSummary::collect(&store)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::FullAnalysis { state } => {
            let enabled = matches!(state, Toggle::On);
            store.set_flag(ContextKey::FullGapAnalysis, enabled)?;
            println!(
                "Full gap analysis {}",
                if enabled { "enabled" } else { "disabled" }
            );
        }
        Commands::GenConfig { .. } | Commands::Validate { .. } => {}
    }

    Ok(())
}

fn build_detector(config: Option<&PathBuf>, store: &SqliteGapStore) -> Result<Detector> {
    let config = match config {
        Some(path) => DetectorConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => DetectorConfig::default(),
    };

    let detector = GapDetector::new(config, store.clone(), store.clone(), store.clone())?;
    Ok(detector)
}

/// One cycle with a minimal router: read the existing ids inside the current
/// gaps, up to `batch_size`.
fn run_cycle(detector: &mut Detector, store: &SqliteGapStore, batch_size: usize) -> Result<CycleReport> {
    let mut cycle = detector.begin_cycle()?;

    let mut read = Vec::new();
    for gap in store.load_gaps()? {
        if read.len() >= batch_size {
            break;
        }
        let ids = store.query_existing_ids(gap.start_id, gap.end_id)?;
        let room = batch_size - read.len();
        read.extend(ids.into_iter().take(room));
    }

    let all_data_read = read.len() < batch_size;
    tracing::debug!(read = read.len(), all_data_read, "Router batch read");

    cycle.add_observed_ids(read);
    cycle.set_all_data_read(all_data_read);
    Ok(cycle.end_cycle()?)
}

async fn run_loop(
    mut detector: Detector,
    store: SqliteGapStore,
    interval_secs: u64,
    batch_size: usize,
    stats_every: u64,
) -> Result<()> {
    tracing::info!("Gap detector starting...");
    tracing::info!("  Interval: {}s", interval_secs);
    tracing::info!("  Batch size: {}", batch_size);
    tracing::info!("  Max gap size: {}", detector.config().max_gap_size);

    let stats = detector.stats();
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result?;
                println!("\nShutting down...");
                break;
            }
            _ = interval.tick() => {
                match run_cycle(&mut detector, &store, batch_size) {
                    Ok(report) => {
                        if report.changed() {
                            print_report(&report);
                        }
                    }
                    // Retried on the next tick
                    Err(e) => tracing::error!("Cycle failed: {:#}", e),
                }

                let snapshot = stats.snapshot();
                if stats_every > 0 && snapshot.cycles > 0 && snapshot.cycles % stats_every == 0 {
                    print_stats(&snapshot);
                }
            }
        }
    }

    println!("\nFinal Statistics:");
    print_stats(&stats.snapshot());
    Ok(())
}

fn print_report(report: &CycleReport) {
    println!(
        "Cycle: {} gaps, {} ids read, {} deleted, {} inserted, {} expired{}",
        report.gaps_loaded,
        report.observed_ids,
        report.gaps_deleted,
        report.gaps_inserted,
        report.gaps_expired,
        if report.full_analysis { " (full)" } else { "" }
    );
    if let Some(frontier) = report.frontier {
        println!("  Frontier: {}", frontier);
    }
    match report.probe {
        ProbeOutcome::Busy(gap) => println!("  Busy channel at {}", gap),
        ProbeOutcome::Deferred => println!("  Busy probe deferred"),
        ProbeOutcome::NotNeeded | ProbeOutcome::Clear => {}
    }
}

fn print_stats(stats: &DetectorStatsSnapshot) {
    println!(
        "Cycles: {} ({} failed) | Gaps +{} -{} expired {} | Frontier moves: {} | Busy stops: {} | {:.2} cycles/s",
        stats.cycles,
        stats.failed_cycles,
        stats.gaps_inserted,
        stats.gaps_deleted,
        stats.gaps_expired,
        stats.frontier_extensions,
        stats.busy_stops,
        stats.cycles_per_sec()
    );
}

#[derive(Debug, Serialize)]
struct StoreSummary {
    gaps: usize,
    frontier: Option<Gap>,
    max_change_id: Option<i64>,
    full_gap_analysis: bool,
    last_busy_expire_run: Option<DateTime<Utc>>,
    server_time: DateTime<Utc>,
}

impl StoreSummary {
    fn collect(store: &SqliteGapStore) -> Result<Self> {
        let gaps = store.load_gaps()?;
        Ok(Self {
            gaps: gaps.len(),
            frontier: gaps.last().copied(),
            max_change_id: store.max_existing_id()?,
            full_gap_analysis: store.flag(ContextKey::FullGapAnalysis)?,
            last_busy_expire_run: store.timestamp(ContextKey::LastBusyExpireRun)?,
            server_time: store.server_time()?,
        })
    }
}

fn cmd_gen_config(output: PathBuf) -> Result<()> {
    let toml = DetectorConfig::default().to_toml()?;
    std::fs::write(&output, toml)?;
    println!("Generated configuration: {}", output.display());
    Ok(())
}

fn cmd_validate(path: PathBuf) -> Result<()> {
    match DetectorConfig::from_file(&path) {
        Ok(config) => {
            println!("Configuration is valid:");
            println!("  Max gap size: {}", config.max_gap_size);
            println!("  Stale gap time: {}ms", config.stale_gap_time_ms);
            println!("  Busy expire time: {}ms", config.stale_gap_busy_expire_time_ms);
            println!("  Clock sync tolerance: {}ms", config.clock_sync_tolerance_ms);
            println!("  Id increment: {}", config.id_increment);
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
