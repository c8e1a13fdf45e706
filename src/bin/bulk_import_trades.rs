// src/bin/bulk_import_trades.rs
//
// Day CSV pairs -> staging tables (COPY) -> production in one transaction.
//
// Usage:
//   cargo run --bin bulk_import_trades -- --csv-dir csv_output
//   cargo run --bin bulk_import_trades -- --csv-dir csv_output --staging-only
//   cargo run --bin bulk_import_trades -- --migrate-only
//   cargo run --bin bulk_import_trades -- --csv-dir csv_output --start-date 20251006
//   cargo run --bin bulk_import_trades -- --csv-dir csv_output --dry-run

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use sea_orm::Database;
use serde_json::json;

use twap_ingest::config::Settings;
use twap_ingest::models::DayKey;
use twap_ingest::services::retry::RetryPolicy;
use twap_ingest::services::staged_migrator::{
    MigrationOptions, MigrationReport, StagedMigrator, DEFAULT_CHUNK_BYTES,
};
use twap_ingest::services::trade_store::{MemoryTradeStore, PgTradeStore, TradeStore};

const IMPORT_PREVIEW_FILE: &str = "import_preview.json";
const PREVIEW_LEADERBOARD_SIZE: usize = 20;

#[derive(Parser, Debug)]
#[command(name = "bulk_import_trades")]
#[command(about = "Stage and migrate generated trade CSVs into Postgres")]
struct Args {
    /// CSV directory (repeatable); format sub-directories are searched too
    #[arg(long = "csv-dir")]
    csv_dirs: Vec<PathBuf>,

    /// Run against an in-memory store and write import_preview.json
    #[arg(long)]
    dry_run: bool,

    /// Bytes per COPY message
    #[arg(long, default_value_t = DEFAULT_CHUNK_BYTES)]
    batch_size: usize,

    /// Load and verify staging, then stop
    #[arg(long, conflicts_with = "migrate_only")]
    staging_only: bool,

    /// Migrate what staging already holds
    #[arg(long)]
    migrate_only: bool,

    /// Only load days at or after this one (YYYYMMDD), appending to staging
    #[arg(long)]
    start_date: Option<DayKey>,

    /// Leave the trades id sequence alone after migrating
    #[arg(long)]
    skip_sequence: bool,

    /// Truncate staging before loading
    #[arg(long)]
    reset_staging: bool,

    /// Attempts per day for transient COPY failures
    #[arg(long, default_value = "5")]
    max_attempts: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    twap_ingest::init_tracing(twap_ingest::DEFAULT_LOG_FILTER);
    let args = Args::parse();

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Import aborted: {}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;
    let csv_dirs = if args.csv_dirs.is_empty() {
        vec![settings.csv_output_dir.clone()]
    } else {
        args.csv_dirs.clone()
    };

    let options = MigrationOptions {
        staging_only: args.staging_only,
        migrate_only: args.migrate_only,
        start_date: args.start_date,
        skip_sequence: args.skip_sequence,
        reset_staging: args.reset_staging,
        chunk_bytes: args.batch_size,
        retry: if args.dry_run {
            RetryPolicy::none()
        } else {
            RetryPolicy::new(args.max_attempts, 1_000, 30_000, 0.2)
        },
    };

    let started = Instant::now();
    if args.dry_run {
        dry_run(&settings, &csv_dirs, options).await?;
    } else {
        let db = Database::connect(settings.require_database_url()?).await?;
        let store = PgTradeStore::new(db);
        let report = StagedMigrator::new(&store, options).run(&csv_dirs).await?;
        print_report(&report);
    }

    println!("Elapsed: {:.1}s", started.elapsed().as_secs_f64());
    Ok(())
}

async fn dry_run(
    settings: &Settings,
    csv_dirs: &[PathBuf],
    mut options: MigrationOptions,
) -> Result<(), Box<dyn std::error::Error>> {
    let production_max_id = match settings.database_url.as_deref() {
        Some(url) => {
            let db = Database::connect(url).await?;
            PgTradeStore::new(db).production_max_id().await?
        }
        None => {
            tracing::warn!("DATABASE_URL not set, verifying against an empty production table");
            None
        }
    };

    let store = match production_max_id {
        Some(max) => MemoryTradeStore::with_production_max_id(max),
        None => MemoryTradeStore::new(),
    };
    options.migrate_only = false;
    options.reset_staging = true;

    let report = StagedMigrator::new(&store, options).run(csv_dirs).await?;
    print_report(&report);

    let preview_path = csv_dirs
        .first()
        .map(|dir| dir.join(IMPORT_PREVIEW_FILE))
        .unwrap_or_else(|| PathBuf::from(IMPORT_PREVIEW_FILE));
    let preview = json!({
        "production_max_id": production_max_id,
        "report": report,
        "leaderboard_top": store.preview_leaderboard(PREVIEW_LEADERBOARD_SIZE),
    });
    std::fs::write(&preview_path, serde_json::to_string_pretty(&preview)?)?;
    println!("Preview written to {}", preview_path.display());
    Ok(())
}

fn print_report(report: &MigrationReport) {
    println!();
    println!("=== Import summary ===");
    println!("Day partitions:     {}", report.partitions.len());
    println!("Staged trades:      {}", report.loaded.trades);
    println!("Staged participants:{}", report.loaded.participants);
    if let Some(range) = report.staging_range {
        println!("Staging id range:   {}..={}", range.min, range.max);
    }
    match report.production_max_before {
        Some(max) => println!("Production max id:  {}", max),
        None => println!("Production max id:  (empty)"),
    }
    if report.stopped_after_staging {
        println!("Stopped after staging; run with --migrate-only to finish");
    }
    if let Some(migrated) = report.migrated {
        println!("Migrated trades:    {}", migrated.trades);
        println!("Migrated participants: {}", migrated.participants);
    }
    if let Some(sequence) = report.sequence {
        println!("Sequence now at:    {}", sequence);
    }
}
