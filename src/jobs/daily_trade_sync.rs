use std::path::PathBuf;

use chrono::Utc;
use sea_orm::{DatabaseConnection, TransactionTrait};
use serde::Serialize;
use tokio::time::{interval, Duration};

use crate::models::{DayKey, ReconstructedTrade};
use crate::parsers::SourceFormat;
use crate::services::day_processor::{discover_days, for_each_trade, DayStats};
use crate::services::sync_status::{self, intervals, jobs};
use crate::services::trade_writer::{insert_batch, InsertSummary};

#[derive(Debug, Clone, Serialize)]
pub struct DailySyncReport {
    pub day: DayKey,
    pub stats: DayStats,
    pub insert: InsertSummary,
}

pub async fn start_daily_trade_sync_job(db: DatabaseConnection, source_dir: PathBuf, format: SourceFormat) {
    tokio::spawn(async move {
        let mut interval = interval(Duration::from_secs(3600)); // Every hour, until yesterday lands

        loop {
            interval.tick().await;
            let yesterday = DayKey::new(Utc::now().date_naive() - chrono::Duration::days(1));

            match sync_day(&db, &source_dir, format, yesterday).await {
                Ok(Some(report)) => tracing::info!(
                    day = %report.day,
                    trades = report.insert.inserted,
                    "Daily trade sync complete"
                ),
                Ok(None) => {}
                Err(e) => tracing::error!(day = %yesterday, "Daily trade sync failed: {}", e),
            }
        }
    });
}

fn job_key(format: SourceFormat, day: DayKey) -> String {
    format!("{}:{}:{}", jobs::DAILY_TRADE_SYNC, format.dir_name(), day)
}

/// Ingest one day of one source through the direct insert path.
///
/// Returns `None` when the day was already synced or its partition has not arrived yet. A day
/// that fails to insert is rolled back and recorded as a failure, so the next tick retries it.
pub async fn sync_day(
    db: &DatabaseConnection,
    source_dir: &std::path::Path,
    format: SourceFormat,
    day: DayKey,
) -> Result<Option<DailySyncReport>, Box<dyn std::error::Error + Send + Sync>> {
    let key = job_key(format, day);
    if sync_status::has_succeeded(db, &key).await? {
        tracing::debug!("[{}] Already synced", key);
        return Ok(None);
    }

    let Some(source) = discover_days(source_dir, Some(day), Some(day))?.into_iter().next() else {
        tracing::info!("[{}] Partition not available yet", key);
        return Ok(None);
    };

    let started_at = Utc::now().naive_utc();
    let parser = format.parser();
    let mut trades: Vec<ReconstructedTrade> = Vec::new();

    // incomplete trades are rejected, as in the bulk path
    let stats = match for_each_trade(&parser, &source, false, |trade| {
        trades.push(trade);
        Ok(())
    }) {
        Ok(stats) => stats,
        Err(e) => {
            sync_status::record_failure(db, &key, &e.to_string(), intervals::DAILY_TRADE_SYNC).await?;
            return Err(e.into());
        }
    };

    if stats.parse_errors > 0 {
        tracing::warn!("[{}] {} lines failed to parse", key, stats.parse_errors);
    }

    // the day's rows and its success marker commit together; a failed day leaves nothing behind
    let txn = db.begin().await?;
    let insert = match insert_batch(&txn, &trades).await {
        Ok(insert) => insert,
        Err(e) => {
            txn.rollback().await?;
            sync_status::record_failure(db, &key, &e.to_string(), intervals::DAILY_TRADE_SYNC).await?;
            return Err(e.into());
        }
    };
    sync_status::record_success(
        &txn,
        &key,
        started_at,
        Some(insert.inserted as i64),
        intervals::DAILY_TRADE_SYNC,
    )
    .await?;
    txn.commit().await?;

    Ok(Some(DailySyncReport { day, stats, insert }))
}
