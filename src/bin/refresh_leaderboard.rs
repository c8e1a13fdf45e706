// src/bin/refresh_leaderboard.rs
//
// One-off leaderboard refresh, e.g. a full recompute after a bulk import.
//
// Usage:
//   cargo run --bin refresh_leaderboard -- --strategy full --top 10

use std::process::ExitCode;

use clap::Parser;
use sea_orm::Database;

use twap_ingest::config::Settings;
use twap_ingest::jobs::leaderboard_sync::sync_leaderboard;
use twap_ingest::services::leaderboard::{LeaderboardService, LeaderboardStrategy};

#[derive(Parser, Debug)]
#[command(name = "refresh_leaderboard")]
#[command(about = "Recompute the TWAP volume leaderboard")]
struct Args {
    /// full | incremental | materialized (defaults to LEADERBOARD_STRATEGY)
    #[arg(long)]
    strategy: Option<LeaderboardStrategy>,

    /// Print this many top users afterwards
    #[arg(long, default_value = "10")]
    top: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    twap_ingest::init_tracing(twap_ingest::DEFAULT_LOG_FILTER);
    let args = Args::parse();

    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let settings = Settings::from_env()?;
    let strategy = args.strategy.unwrap_or(settings.leaderboard_strategy);
    let db = Database::connect(settings.require_database_url()?).await?;

    let interval = i32::try_from(settings.leaderboard_interval_secs).unwrap_or(i32::MAX);
    let outcome = sync_leaderboard(&db, strategy, interval).await?;
    println!("Strategy: {}", outcome.strategy);
    println!("Users written: {}", outcome.users_written);

    let top = LeaderboardService::new(db).top(outcome.strategy, args.top).await?;
    for entry in top {
        println!(
            "{:>4}  {}  volume={}  trades={}  strategies={}",
            entry.rank, entry.user_address, entry.total_volume, entry.total_trades, entry.unique_strategies
        );
    }
    Ok(())
}
