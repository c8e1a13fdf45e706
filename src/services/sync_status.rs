//! Sync status bookkeeping for the periodic jobs.
//!
//! Prevents redundant work on restart and remembers when the last successful run started, which
//! is the cutoff for incremental leaderboard refreshes.

use chrono::{Duration, NaiveDateTime, Utc};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};

use crate::entities::sync_status::{self, Entity as SyncStatus};

/// Job names for tracking sync status
pub mod jobs {
    /// `leaderboard_stats` refreshes (full and incremental share the cutoff)
    pub const LEADERBOARD_STATS_SYNC: &str = "leaderboard_sync:stats";
    /// `leaderboard_mv` refreshes
    pub const LEADERBOARD_VIEW_SYNC: &str = "leaderboard_sync:mv";
    pub const DAILY_TRADE_SYNC: &str = "daily_trade_sync";
}

/// Default minimum intervals between syncs (in seconds)
pub mod intervals {
    pub const LEADERBOARD_SYNC: i32 = 900; // 15 minutes
    pub const DAILY_TRADE_SYNC: i32 = 86400; // once per day partition
}

async fn find<C: ConnectionTrait>(
    db: &C,
    job_name: &str,
) -> Result<Option<sync_status::Model>, sea_orm::DbErr> {
    SyncStatus::find()
        .filter(sync_status::Column::JobName.eq(job_name))
        .one(db)
        .await
}

/// Check if a sync job should run based on last successful sync time
///
/// Returns true if:
/// - No record exists for this job (first run)
/// - Last successful sync was at least min_interval_secs ago
pub async fn should_sync(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    let Some(record) = find(db, job_name).await? else {
        tracing::info!("[{}] First run detected, will sync", job_name);
        return Ok(true);
    };

    let Some(last_success) = record.last_success_at else {
        tracing::info!("[{}] No previous successful sync, will sync", job_name);
        return Ok(true);
    };

    let elapsed = Utc::now().naive_utc().signed_duration_since(last_success);
    let interval = Duration::seconds(record.min_interval_secs as i64);
    if elapsed >= interval {
        tracing::info!(
            "[{}] Last sync was {}s ago (min: {}s), will sync",
            job_name,
            elapsed.num_seconds(),
            record.min_interval_secs
        );
        Ok(true)
    } else {
        tracing::info!(
            "[{}] Skipping sync - last sync was {}s ago, next sync in {}s",
            job_name,
            elapsed.num_seconds(),
            (interval - elapsed).num_seconds()
        );
        Ok(false)
    }
}

/// Whether `job_name` has ever completed successfully
pub async fn has_succeeded(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<bool, Box<dyn std::error::Error + Send + Sync>> {
    Ok(find(db, job_name)
        .await?
        .is_some_and(|r| r.last_success_at.is_some()))
}

/// Start time of the last successful run, if any
pub async fn last_run_started_at(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<Option<NaiveDateTime>, Box<dyn std::error::Error + Send + Sync>> {
    Ok(find(db, job_name)
        .await?
        .and_then(|r| r.last_success_at.and(r.last_run_started_at)))
}

/// Record a successful sync that started at `run_started_at`.
///
/// Takes any connection so the marker can commit in the same transaction as the work it records.
pub async fn record_success<C: ConnectionTrait>(
    db: &C,
    job_name: &str,
    run_started_at: NaiveDateTime,
    rows_affected: Option<i64>,
    default_interval_secs: i32,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let now = Utc::now().naive_utc();

    match find(db, job_name).await? {
        Some(record) => {
            let success_count = record.success_count + 1;
            let mut active_model: sync_status::ActiveModel = record.into();
            active_model.last_run_started_at = Set(Some(run_started_at));
            active_model.last_success_at = Set(Some(now));
            active_model.last_attempt_at = Set(Some(now));
            active_model.last_error = Set(None);
            active_model.last_rows_affected = Set(rows_affected);
            active_model.success_count = Set(success_count);
            active_model.update(db).await?;
        }
        None => {
            let new_record = sync_status::ActiveModel {
                job_name: Set(job_name.to_string()),
                last_run_started_at: Set(Some(run_started_at)),
                last_success_at: Set(Some(now)),
                last_attempt_at: Set(Some(now)),
                last_error: Set(None),
                last_rows_affected: Set(rows_affected),
                success_count: Set(1),
                error_count: Set(0),
                min_interval_secs: Set(default_interval_secs),
                ..Default::default()
            };
            new_record.insert(db).await?;
        }
    }

    tracing::debug!("[{}] Recorded successful sync", job_name);
    Ok(())
}

/// Record a failed sync attempt. The last successful run start is left as it was.
pub async fn record_failure(
    db: &DatabaseConnection,
    job_name: &str,
    error: &str,
    default_interval_secs: i32,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let now = Utc::now().naive_utc();

    match find(db, job_name).await? {
        Some(record) => {
            let error_count = record.error_count + 1;
            let mut active_model: sync_status::ActiveModel = record.into();
            active_model.last_attempt_at = Set(Some(now));
            active_model.last_error = Set(Some(error.to_string()));
            active_model.error_count = Set(error_count);
            active_model.update(db).await?;
        }
        None => {
            let new_record = sync_status::ActiveModel {
                job_name: Set(job_name.to_string()),
                last_run_started_at: Set(None),
                last_success_at: Set(None),
                last_attempt_at: Set(Some(now)),
                last_error: Set(Some(error.to_string())),
                last_rows_affected: Set(None),
                success_count: Set(0),
                error_count: Set(1),
                min_interval_secs: Set(default_interval_secs),
                ..Default::default()
            };
            new_record.insert(db).await?;
        }
    }

    tracing::debug!("[{}] Recorded failed sync: {}", job_name, error);
    Ok(())
}
