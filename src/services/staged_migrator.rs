//! Staged import of day CSV pairs: staging tables first, production in one transaction.
//!
//! ```text
//! SCAN -> STAGE_LOAD (per day) -> VERIFY -> [stop if staging_only]
//!      -> MIGRATE -> ADVANCE_SEQUENCE -> CLEANUP
//! ```
//!
//! Every abort leaves production untouched. Staging survives a failed MIGRATE so the run can be
//! retried with `--migrate-only`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::error::MigrationError;
use crate::models::DayKey;
use crate::services::csv_emitter::participants_file_name;
use crate::services::progress::ProgressReporter;
use crate::services::retry::RetryPolicy;
use crate::services::trade_store::{IdRange, StagingCounts, TradeStore};

lazy_static! {
    static ref TRADES_FILE: Regex = Regex::new(r"^trades_(\d{8})\.csv$").unwrap();
}

pub const DEFAULT_CHUNK_BYTES: usize = 4 * 1024 * 1024;

/// One day's CSV pair as found on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayPartition {
    pub day: DayKey,
    pub trades_csv: PathBuf,
    pub participants_csv: PathBuf,
}

/// Day partitions across every CSV directory, chronological, at or after `start`.
///
/// Each directory is searched along with its immediate sub-directories, so both
/// `csv_output/` and `csv_output/node_trades/` work. Two formats emitting the same day yield two
/// partitions.
pub fn scan_partitions(csv_dirs: &[PathBuf], start: Option<DayKey>) -> Result<Vec<DayPartition>, MigrationError> {
    let mut partitions = Vec::new();
    for dir in csv_dirs {
        let mut search = vec![dir.clone()];
        for entry in read_dir(dir)? {
            if entry.is_dir() {
                search.push(entry);
            }
        }
        for dir in search {
            for path in read_dir(&dir)? {
                if let Some(partition) = partition_for(&path)? {
                    partitions.push(partition);
                }
            }
        }
    }

    partitions.retain(|p| start.is_none_or(|s| p.day >= s));
    partitions.sort_by(|a, b| (a.day, &a.trades_csv).cmp(&(b.day, &b.trades_csv)));
    partitions.dedup();
    Ok(partitions)
}

fn read_dir(dir: &Path) -> Result<Vec<PathBuf>, MigrationError> {
    let scan_err = |source| MigrationError::Scan {
        path: dir.to_path_buf(),
        source,
    };
    fs::read_dir(dir)
        .map_err(scan_err)?
        .map(|entry| entry.map(|e| e.path()).map_err(scan_err))
        .collect()
}

fn partition_for(path: &Path) -> Result<Option<DayPartition>, MigrationError> {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return Ok(None);
    };
    let Some(day) = TRADES_FILE
        .captures(name)
        .and_then(|c| c[1].parse::<DayKey>().ok())
    else {
        return Ok(None);
    };

    let participants_csv = path.with_file_name(participants_file_name(day));
    if !participants_csv.is_file() {
        return Err(MigrationError::MissingParticipants {
            trades_csv: path.to_path_buf(),
        });
    }
    Ok(Some(DayPartition {
        day,
        trades_csv: path.to_path_buf(),
        participants_csv,
    }))
}

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Stop after VERIFY, leaving staging loaded.
    pub staging_only: bool,
    /// Skip SCAN and STAGE_LOAD; migrate whatever staging holds.
    pub migrate_only: bool,
    /// Resume point: only load partitions at or after this day, appending to staging.
    pub start_date: Option<DayKey>,
    pub skip_sequence: bool,
    pub reset_staging: bool,
    /// Bytes per COPY message.
    pub chunk_bytes: usize,
    pub retry: RetryPolicy,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            staging_only: false,
            migrate_only: false,
            start_date: None,
            skip_sequence: false,
            reset_staging: false,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            retry: RetryPolicy::bulk_copy(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub partitions: Vec<DayPartition>,
    /// Rows loaded into staging by this run
    pub loaded: StagingCounts,
    pub staging_range: Option<IdRange>,
    pub production_max_before: Option<i64>,
    pub migrated: Option<StagingCounts>,
    pub sequence: Option<i64>,
    pub stopped_after_staging: bool,
}

pub struct StagedMigrator<'a, S: TradeStore + ?Sized> {
    store: &'a S,
    options: MigrationOptions,
}

impl<'a, S: TradeStore + ?Sized> StagedMigrator<'a, S> {
    pub fn new(store: &'a S, options: MigrationOptions) -> Self {
        Self { store, options }
    }

    pub async fn run(&self, csv_dirs: &[PathBuf]) -> Result<MigrationReport, MigrationError> {
        let mut report = MigrationReport::default();

        if !self.options.migrate_only {
            report.partitions = scan_partitions(csv_dirs, self.options.start_date)?;
            if report.partitions.is_empty() {
                return Err(MigrationError::NothingToImport(csv_dirs.to_vec()));
            }
            tracing::info!(
                partitions = report.partitions.len(),
                first = %report.partitions[0].day,
                last = %report.partitions[report.partitions.len() - 1].day,
                "Scanned day partitions"
            );

            self.prepare_staging().await?;
            report.loaded = self.stage_load(&report.partitions).await?;
        }

        let (range, production_max) = self.verify().await?;
        report.staging_range = Some(range);
        report.production_max_before = production_max;

        if self.options.staging_only {
            tracing::info!(min_id = range.min, max_id = range.max, "Staging verified, stopping (--staging-only)");
            report.stopped_after_staging = true;
            return Ok(report);
        }

        tracing::info!(min_id = range.min, max_id = range.max, "Migrating staging into production");
        let migrated = self
            .store
            .migrate_staging()
            .await
            .map_err(MigrationError::Migrate)?;
        tracing::info!(
            trades = migrated.trades,
            participants = migrated.participants,
            "Migration committed"
        );
        report.migrated = Some(migrated);

        if self.options.skip_sequence {
            tracing::warn!("Skipping sequence advance (--skip-sequence)");
        } else {
            report.sequence = self.store.advance_sequence().await?;
            tracing::info!(sequence = ?report.sequence, "Advanced trades id sequence");
        }

        self.store.truncate_staging().await?;
        tracing::info!("Staging truncated");
        Ok(report)
    }

    async fn prepare_staging(&self) -> Result<(), MigrationError> {
        let existing = self.store.staging_counts().await?;
        if existing.is_empty() {
            return Ok(());
        }
        if self.options.reset_staging {
            tracing::warn!(
                trades = existing.trades,
                participants = existing.participants,
                "Truncating staging (--reset-staging)"
            );
            self.store.truncate_staging().await?;
        } else if self.options.start_date.is_some() {
            tracing::info!(
                trades = existing.trades,
                participants = existing.participants,
                "Resuming into non-empty staging"
            );
        } else {
            return Err(MigrationError::StagingNotEmpty {
                trades: existing.trades,
                participants: existing.participants,
            });
        }
        Ok(())
    }

    async fn stage_load(&self, partitions: &[DayPartition]) -> Result<StagingCounts, MigrationError> {
        let mut total = StagingCounts::default();
        let mut progress = ProgressReporter::new("stage", 1, Duration::from_secs(30));

        for (done, partition) in partitions.iter().enumerate() {
            let counts = self
                .options
                .retry
                .retry_async_if(
                    |_| self.store.load_day_into_staging(partition, self.options.chunk_bytes),
                    |err| err.is_retryable(),
                )
                .await
                .map_err(|source| MigrationError::StageLoad {
                    day: partition.day,
                    source,
                })?;

            tracing::debug!(
                day = %partition.day,
                trades = counts.trades,
                participants = counts.participants,
                "Day staged"
            );
            total.trades += counts.trades;
            total.participants += counts.participants;
            progress.tick(done as u64 + 1, || {
                format!(
                    "day {}, {} trades, {} participants",
                    partition.day, total.trades, total.participants
                )
            });
        }

        tracing::info!(
            days = partitions.len(),
            trades = total.trades,
            participants = total.participants,
            elapsed_secs = progress.elapsed().as_secs(),
            "Staging load complete"
        );
        Ok(total)
    }

    /// Deferred row checks plus the id range gate. Nothing here writes.
    async fn verify(&self) -> Result<(IdRange, Option<i64>), MigrationError> {
        let anomalies = self.store.staging_anomalies().await?;
        if !anomalies.is_clean() {
            return Err(MigrationError::StagingAnomalies(anomalies.to_string()));
        }

        let range = self
            .store
            .staging_id_range()
            .await?
            .ok_or(MigrationError::EmptyStaging)?;
        let production_max = self.store.production_max_id().await?;

        if let Some(max) = production_max {
            if range.min <= max {
                return Err(MigrationError::IdConflict {
                    staging_min: range.min,
                    production_max: max,
                    next_safe_id: max + 1,
                });
            }
        }
        Ok((range, production_max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    fn pair(dir: &Path, day: &str) {
        touch(&dir.join(format!("trades_{day}.csv")));
        touch(&dir.join(format!("trade_participants_{day}.csv")));
    }

    #[test]
    fn scan_merges_format_dirs_in_day_order() {
        let root = tempfile::tempdir().unwrap();
        pair(&root.path().join("node_trades"), "20251006");
        pair(&root.path().join("node_fills_by_block"), "20251005");
        pair(&root.path().join("node_fills_by_block"), "20251007");
        touch(&root.path().join("node_trades/notes.txt"));

        let partitions = scan_partitions(&[root.path().to_path_buf()], None).unwrap();
        let days: Vec<String> = partitions.iter().map(|p| p.day.to_string()).collect();
        assert_eq!(days, ["20251005", "20251006", "20251007"]);
        assert!(partitions[1].trades_csv.starts_with(root.path().join("node_trades")));
    }

    #[test]
    fn scan_filters_by_resume_date() {
        let root = tempfile::tempdir().unwrap();
        for day in ["20251004", "20251005", "20251006"] {
            pair(root.path(), day);
        }

        let partitions = scan_partitions(&[root.path().to_path_buf()], Some("20251005".parse().unwrap())).unwrap();
        let days: Vec<String> = partitions.iter().map(|p| p.day.to_string()).collect();
        assert_eq!(days, ["20251005", "20251006"]);
    }

    #[test]
    fn scan_rejects_trades_file_without_participants() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("trades_20251006.csv"));

        let err = scan_partitions(&[root.path().to_path_buf()], None).unwrap_err();
        assert!(matches!(err, MigrationError::MissingParticipants { .. }));
    }
}
