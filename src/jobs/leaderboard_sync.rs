use chrono::Utc;
use sea_orm::DatabaseConnection;
use tokio::time::{interval, Duration};

use crate::services::leaderboard::{LeaderboardService, LeaderboardStrategy, RefreshOutcome};
use crate::services::sync_status::{self, intervals, jobs};

pub async fn start_leaderboard_sync_job(
    db: DatabaseConnection,
    strategy: LeaderboardStrategy,
    interval_secs: u64,
) {
    tokio::spawn(async move {
        let min_interval = i32::try_from(interval_secs).unwrap_or(intervals::LEADERBOARD_SYNC);

        // Skip the startup run if a recent one already exists
        match sync_status::should_sync(&db, status_key(strategy)).await {
            Ok(true) => {
                tracing::info!(%strategy, "Running initial leaderboard refresh");
                if let Err(e) = sync_leaderboard(&db, strategy, min_interval).await {
                    tracing::error!("Failed to refresh leaderboard on startup: {}", e);
                }
            }
            Ok(false) => {}
            Err(e) => tracing::error!("Failed to read leaderboard sync status: {}", e),
        }

        let mut interval = interval(Duration::from_secs(interval_secs.max(1)));
        interval.tick().await; // first tick completes immediately

        loop {
            interval.tick().await;
            tracing::info!(%strategy, "Starting scheduled leaderboard refresh");

            if let Err(e) = sync_leaderboard(&db, strategy, min_interval).await {
                tracing::error!("Failed to refresh leaderboard: {}", e);
            }
        }
    });
}

/// `sync_status` key for the relation `strategy` maintains.
///
/// Full and incremental runs both rebuild `leaderboard_stats`, so they share one key and the
/// incremental cutoff only ever comes from a stats refresh.
pub fn status_key(strategy: LeaderboardStrategy) -> &'static str {
    match strategy {
        LeaderboardStrategy::Full | LeaderboardStrategy::Incremental => jobs::LEADERBOARD_STATS_SYNC,
        LeaderboardStrategy::MaterializedView => jobs::LEADERBOARD_VIEW_SYNC,
    }
}

/// One refresh, recorded in `sync_status`. Incremental runs measure from the last successful start.
pub async fn sync_leaderboard(
    db: &DatabaseConnection,
    strategy: LeaderboardStrategy,
    min_interval_secs: i32,
) -> Result<RefreshOutcome, Box<dyn std::error::Error + Send + Sync>> {
    let since = match strategy {
        LeaderboardStrategy::Incremental => sync_status::last_run_started_at(db, status_key(strategy)).await?,
        LeaderboardStrategy::Full | LeaderboardStrategy::MaterializedView => None,
    };

    let service = LeaderboardService::new(db.clone());
    match service.refresh(strategy, since).await {
        Ok(outcome) => {
            sync_status::record_success(
                db,
                status_key(outcome.strategy),
                outcome.started_at,
                Some(outcome.users_written as i64),
                min_interval_secs,
            )
            .await?;
            tracing::info!(
                strategy = %outcome.strategy,
                users = outcome.users_written,
                took_ms = (Utc::now().naive_utc() - outcome.started_at).num_milliseconds(),
                "Leaderboard sync complete"
            );
            Ok(outcome)
        }
        Err(e) => {
            sync_status::record_failure(db, status_key(strategy), &e.to_string(), min_interval_secs).await?;
            Err(e.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_refreshes_never_move_the_stats_cutoff() {
        assert_eq!(status_key(LeaderboardStrategy::Full), status_key(LeaderboardStrategy::Incremental));
        assert_ne!(
            status_key(LeaderboardStrategy::MaterializedView),
            status_key(LeaderboardStrategy::Incremental)
        );
    }
}
