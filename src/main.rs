use sea_orm::Database;
use sea_orm_migration::MigratorTrait;

use twap_ingest::config::Settings;
use twap_ingest::jobs::daily_trade_sync::start_daily_trade_sync_job;
use twap_ingest::jobs::leaderboard_sync::start_leaderboard_sync_job;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    twap_ingest::init_tracing(twap_ingest::DEFAULT_LOG_FILTER);

    // Load environment variables
    let settings = Settings::from_env()?;

    // Connect to database
    tracing::info!("Connecting to database...");
    let db = Database::connect(settings.require_database_url()?).await?;

    // Run migrations
    tracing::info!("Running migrations...");
    migration::Migrator::up(&db, None).await?;

    tracing::info!(
        strategy = %settings.leaderboard_strategy,
        interval_secs = settings.leaderboard_interval_secs,
        "Starting leaderboard sync job"
    );
    start_leaderboard_sync_job(
        db.clone(),
        settings.leaderboard_strategy,
        settings.leaderboard_interval_secs,
    )
    .await;

    match settings.daily_sync.clone() {
        Some((source_dir, format)) => {
            tracing::info!(source = %source_dir.display(), %format, "Starting daily trade sync job");
            start_daily_trade_sync_job(db.clone(), source_dir, format).await;
        }
        None => tracing::info!("DAILY_SYNC_SOURCE_DIR not set, daily trade sync disabled"),
    }

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    db.close().await?;
    Ok(())
}
