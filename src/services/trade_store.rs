//! Destination store for the staged import.
//!
//! [`PgTradeStore`] streams day CSVs into the unconstrained staging tables with `COPY FROM STDIN`
//! and moves them to production inside one transaction. [`MemoryTradeStore`] implements the same
//! contract over in-process tables; `bulk_import_trades --dry-run` runs the whole state machine
//! against it.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::Mutex;
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, FromQueryResult, Statement, TransactionTrait,
};
use serde::Serialize;
use sqlx::PgConnection;
use tokio::io::AsyncReadExt;

use crate::error::{EmitError, StoreError};
use crate::models::LeaderboardEntry;
use crate::services::csv_emitter::{
    read_participants_csv, read_trades_csv, ParticipantRow, TradeRow, PARTICIPANT_COLUMNS, PARTICIPANT_TEXT_LIMITS,
    TRADE_COLUMNS, TRADE_TEXT_LIMITS,
};
use crate::services::leaderboard::{aggregate_leaderboard, ParticipationFact};
use crate::services::staged_migrator::DayPartition;

pub const TRADES_STAGING: &str = "trades_staging";
pub const PARTICIPANTS_STAGING: &str = "trade_participants_staging";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StagingCounts {
    pub trades: u64,
    pub participants: u64,
}

impl StagingCounts {
    pub fn is_empty(&self) -> bool {
        self.trades == 0 && self.participants == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IdRange {
    pub min: i64,
    pub max: i64,
}

/// Row-level problems in staging, deferred from the unconstrained load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StagingAnomalies {
    pub null_ids: u64,
    pub duplicate_ids: u64,
    pub orphan_participants: u64,
    pub trades_without_participants: u64,
    /// Rows with a text value longer than its production column
    pub oversized_fields: u64,
}

impl StagingAnomalies {
    pub fn is_clean(&self) -> bool {
        *self == StagingAnomalies::default()
    }
}

impl std::fmt::Display for StagingAnomalies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} NULL ids, {} duplicate ids, {} orphan participants, {} trades without participants, \
             {} rows with oversized fields",
            self.null_ids,
            self.duplicate_ids,
            self.orphan_participants,
            self.trades_without_participants,
            self.oversized_fields
        )
    }
}

#[async_trait]
pub trait TradeStore: Send + Sync {
    async fn staging_counts(&self) -> Result<StagingCounts, StoreError>;

    /// Empty both staging tables, keeping their schema.
    async fn truncate_staging(&self) -> Result<(), StoreError>;

    /// Load one day's CSV pair into staging as a unit: either both files land or neither does.
    async fn load_day_into_staging(
        &self,
        partition: &DayPartition,
        chunk_bytes: usize,
    ) -> Result<StagingCounts, StoreError>;

    async fn staging_id_range(&self) -> Result<Option<IdRange>, StoreError>;

    async fn production_max_id(&self) -> Result<Option<i64>, StoreError>;

    async fn staging_anomalies(&self) -> Result<StagingAnomalies, StoreError>;

    /// Copy staging into production in a single transaction, preserving ids.
    async fn migrate_staging(&self) -> Result<StagingCounts, StoreError>;

    /// Move the production id sequence to the current max id. Returns the new value.
    async fn advance_sequence(&self) -> Result<Option<i64>, StoreError>;
}

pub fn copy_statement(table: &str, columns: &[&str]) -> String {
    format!(
        "COPY {} ({}) FROM STDIN WITH (FORMAT csv, NULL '\\N')",
        table,
        columns.join(", ")
    )
}

/// `col_a > n OR col_b > m ...` over character lengths; NULLs compare as not oversized.
fn oversized_predicate(limits: &[(&str, usize)]) -> String {
    limits
        .iter()
        .map(|(column, max)| format!("char_length({}) > {}", column, max))
        .collect::<Vec<_>>()
        .join(" OR ")
}

pub struct PgTradeStore {
    db: DatabaseConnection,
}

impl PgTradeStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    fn stmt(sql: &str) -> Statement {
        Statement::from_string(DatabaseBackend::Postgres, sql.to_string())
    }
}

#[derive(Debug, FromQueryResult)]
struct CountsRecord {
    trades: i64,
    participants: i64,
}

#[derive(Debug, FromQueryResult)]
struct RangeRecord {
    min_id: Option<i64>,
    max_id: Option<i64>,
}

#[derive(Debug, FromQueryResult)]
struct MaxRecord {
    value: Option<i64>,
}

#[derive(Debug, FromQueryResult)]
struct AnomalyRecord {
    null_ids: i64,
    duplicate_ids: i64,
    orphan_participants: i64,
    trades_without_participants: i64,
    oversized_fields: i64,
}

/// Stream a file into an open `COPY ... FROM STDIN`, in `chunk_bytes` pieces.
async fn copy_file(
    conn: &mut PgConnection,
    statement: &str,
    path: &std::path::Path,
    chunk_bytes: usize,
) -> Result<u64, StoreError> {
    let mut file = tokio::fs::File::open(path)
        .await
        .map_err(|e| EmitError::io(path, e))?;

    let mut copy = conn.copy_in_raw(statement).await?;
    let mut buf = vec![0u8; chunk_bytes.max(8 * 1024)];
    loop {
        let n = match file.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                let err = EmitError::io(path, e);
                copy.abort(err.to_string()).await?;
                return Err(err.into());
            }
        };
        if n == 0 {
            break;
        }
        copy.send(&buf[..n]).await?;
    }
    Ok(copy.finish().await?)
}

#[async_trait]
impl TradeStore for PgTradeStore {
    async fn staging_counts(&self) -> Result<StagingCounts, StoreError> {
        let record = CountsRecord::find_by_statement(Self::stmt(
            r#"
            SELECT
                (SELECT COUNT(*) FROM trades_staging) AS trades,
                (SELECT COUNT(*) FROM trade_participants_staging) AS participants
            "#,
        ))
        .one(&self.db)
        .await?;

        Ok(record
            .map(|r| StagingCounts {
                trades: r.trades as u64,
                participants: r.participants as u64,
            })
            .unwrap_or_default())
    }

    async fn truncate_staging(&self) -> Result<(), StoreError> {
        self.db
            .execute_unprepared("TRUNCATE trades_staging, trade_participants_staging")
            .await?;
        Ok(())
    }

    async fn load_day_into_staging(
        &self,
        partition: &DayPartition,
        chunk_bytes: usize,
    ) -> Result<StagingCounts, StoreError> {
        let pool = self.db.get_postgres_connection_pool();
        let mut tx = pool.begin().await?;

        // COPY of a large day is expected to run long
        sqlx::query("SET LOCAL statement_timeout = 0")
            .execute(&mut *tx)
            .await?;

        let trades = copy_file(
            &mut tx,
            &copy_statement(TRADES_STAGING, &TRADE_COLUMNS),
            &partition.trades_csv,
            chunk_bytes,
        )
        .await?;
        let participants = copy_file(
            &mut tx,
            &copy_statement(PARTICIPANTS_STAGING, &PARTICIPANT_COLUMNS),
            &partition.participants_csv,
            chunk_bytes,
        )
        .await?;

        tx.commit().await?;
        Ok(StagingCounts { trades, participants })
    }

    async fn staging_id_range(&self) -> Result<Option<IdRange>, StoreError> {
        let record = RangeRecord::find_by_statement(Self::stmt(
            "SELECT MIN(id) AS min_id, MAX(id) AS max_id FROM trades_staging",
        ))
        .one(&self.db)
        .await?;

        Ok(record.and_then(|r| match (r.min_id, r.max_id) {
            (Some(min), Some(max)) => Some(IdRange { min, max }),
            _ => None,
        }))
    }

    async fn production_max_id(&self) -> Result<Option<i64>, StoreError> {
        let record = MaxRecord::find_by_statement(Self::stmt("SELECT MAX(id) AS value FROM trades"))
            .one(&self.db)
            .await?;
        Ok(record.and_then(|r| r.value))
    }

    async fn staging_anomalies(&self) -> Result<StagingAnomalies, StoreError> {
        let sql = format!(
            r#"
            SELECT
                (SELECT COUNT(*) FROM trades_staging WHERE id IS NULL) AS null_ids,
                (SELECT COUNT(*) FROM (
                    SELECT id FROM trades_staging WHERE id IS NOT NULL
                    GROUP BY id HAVING COUNT(*) > 1
                ) d) AS duplicate_ids,
                (SELECT COUNT(*) FROM trade_participants_staging p
                    WHERE NOT EXISTS (SELECT 1 FROM trades_staging t WHERE t.id = p.trade_id)
                ) AS orphan_participants,
                (SELECT COUNT(*) FROM trades_staging t
                    WHERE NOT EXISTS (SELECT 1 FROM trade_participants_staging p WHERE p.trade_id = t.id)
                ) AS trades_without_participants,
                (SELECT COUNT(*) FROM trades_staging WHERE {trades_oversized})
                    + (SELECT COUNT(*) FROM trade_participants_staging WHERE {participants_oversized})
                    AS oversized_fields
            "#,
            trades_oversized = oversized_predicate(&TRADE_TEXT_LIMITS),
            participants_oversized = oversized_predicate(&PARTICIPANT_TEXT_LIMITS),
        );
        let record = AnomalyRecord::find_by_statement(Self::stmt(&sql)).one(&self.db).await?;

        Ok(record
            .map(|r| StagingAnomalies {
                null_ids: r.null_ids as u64,
                duplicate_ids: r.duplicate_ids as u64,
                orphan_participants: r.orphan_participants as u64,
                trades_without_participants: r.trades_without_participants as u64,
                oversized_fields: r.oversized_fields as u64,
            })
            .unwrap_or_default())
    }

    async fn migrate_staging(&self) -> Result<StagingCounts, StoreError> {
        let txn = self.db.begin().await?;
        txn.execute_unprepared("SET LOCAL statement_timeout = 0").await?;

        let trades = txn
            .execute_unprepared(
                r#"
                INSERT INTO trades (id, coin, time, price, size, hash, trade_dir_override)
                SELECT id, coin, time, price, size, hash, trade_dir_override
                FROM trades_staging
                ORDER BY id
                "#,
            )
            .await?
            .rows_affected();

        let participants = txn
            .execute_unprepared(
                r#"
                INSERT INTO trade_participants
                    (trade_id, user_address, side, start_pos, order_id, strategy_id, client_order_id)
                SELECT trade_id, user_address, side, start_pos, order_id, strategy_id, client_order_id
                FROM trade_participants_staging
                ORDER BY trade_id
                "#,
            )
            .await?
            .rows_affected();

        txn.commit().await?;
        Ok(StagingCounts { trades, participants })
    }

    async fn advance_sequence(&self) -> Result<Option<i64>, StoreError> {
        let record = MaxRecord::find_by_statement(Self::stmt(
            "SELECT setval(pg_get_serial_sequence('trades', 'id'), (SELECT MAX(id) FROM trades)) AS value",
        ))
        .one(&self.db)
        .await?;
        Ok(record.and_then(|r| r.value))
    }
}

#[derive(Debug, Default)]
struct MemoryTables {
    staging_trades: Vec<TradeRow>,
    staging_participants: Vec<ParticipantRow>,
    trades: BTreeMap<i64, TradeRow>,
    participants: Vec<ParticipantRow>,
    sequence: i64,
    fail_next_migrate: bool,
}

/// In-process store with the same staging/production semantics as Postgres.
///
/// Production ids are a primary key here too: a migration that would duplicate one fails as a
/// whole and leaves production unchanged.
#[derive(Debug, Default)]
pub struct MemoryTradeStore {
    tables: Mutex<MemoryTables>,
}

/// Production contents, for comparing before and after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionSnapshot {
    pub trades: Vec<TradeRow>,
    pub participants: Vec<ParticipantRow>,
    pub sequence: i64,
}

impl MemoryTradeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed production with existing rows, as if previously imported.
    pub fn with_production(trades: Vec<TradeRow>, participants: Vec<ParticipantRow>) -> Self {
        let store = Self::default();
        {
            let mut tables = store.tables.lock();
            tables.sequence = trades.iter().map(|t| t.id).max().unwrap_or_default();
            tables.trades = trades.into_iter().map(|t| (t.id, t)).collect();
            tables.participants = participants;
        }
        store
    }

    /// Stand-in for production rows that live elsewhere (the dry run only knows the max id).
    pub fn with_production_max_id(max_id: i64) -> Self {
        let placeholder = TradeRow {
            id: max_id,
            coin: String::new(),
            time: String::new(),
            price: Default::default(),
            size: Default::default(),
            hash: String::new(),
            trade_dir_override: None,
        };
        Self::with_production(vec![placeholder], Vec::new())
    }

    /// Make the next `migrate_staging` fail, to exercise rollback.
    pub fn fail_next_migrate(&self) {
        self.tables.lock().fail_next_migrate = true;
    }

    pub fn production_snapshot(&self) -> ProductionSnapshot {
        let tables = self.tables.lock();
        ProductionSnapshot {
            trades: tables.trades.values().cloned().collect(),
            participants: tables.participants.clone(),
            sequence: tables.sequence,
        }
    }

    /// Leaderboard over production rows, ranked the same way the SQL strategies rank.
    pub fn preview_leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        let tables = self.tables.lock();
        let facts = tables.participants.iter().filter_map(|p| {
            let trade = tables.trades.get(&p.trade_id)?;
            Some(ParticipationFact {
                user_address: p.user_address.clone(),
                trade_id: p.trade_id,
                strategy_id: p.strategy_id,
                notional: trade.price * trade.size,
            })
        });
        let mut entries = aggregate_leaderboard(facts);
        entries.truncate(limit);
        entries
    }
}

fn exceeds(value: Option<&str>, limits: &[(&str, usize)], column: &str) -> bool {
    let max = limits.iter().find(|(name, _)| *name == column).map(|(_, max)| *max);
    match (value, max) {
        (Some(value), Some(max)) => value.chars().count() > max,
        _ => false,
    }
}

fn trade_oversized(t: &TradeRow) -> bool {
    exceeds(Some(&t.coin), &TRADE_TEXT_LIMITS, "coin")
        || exceeds(Some(&t.hash), &TRADE_TEXT_LIMITS, "hash")
        || exceeds(t.trade_dir_override.as_deref(), &TRADE_TEXT_LIMITS, "trade_dir_override")
}

fn participant_oversized(p: &ParticipantRow) -> bool {
    exceeds(Some(&p.user_address), &PARTICIPANT_TEXT_LIMITS, "user_address")
        || exceeds(p.client_order_id.as_deref(), &PARTICIPANT_TEXT_LIMITS, "client_order_id")
}

#[async_trait]
impl TradeStore for MemoryTradeStore {
    async fn staging_counts(&self) -> Result<StagingCounts, StoreError> {
        let tables = self.tables.lock();
        Ok(StagingCounts {
            trades: tables.staging_trades.len() as u64,
            participants: tables.staging_participants.len() as u64,
        })
    }

    async fn truncate_staging(&self) -> Result<(), StoreError> {
        let mut tables = self.tables.lock();
        tables.staging_trades.clear();
        tables.staging_participants.clear();
        Ok(())
    }

    async fn load_day_into_staging(
        &self,
        partition: &DayPartition,
        _chunk_bytes: usize,
    ) -> Result<StagingCounts, StoreError> {
        // read both before touching staging so a bad file loads nothing
        let trades = read_trades_csv(&partition.trades_csv)?;
        let participants = read_participants_csv(&partition.participants_csv)?;
        let counts = StagingCounts {
            trades: trades.len() as u64,
            participants: participants.len() as u64,
        };

        let mut tables = self.tables.lock();
        tables.staging_trades.extend(trades);
        tables.staging_participants.extend(participants);
        Ok(counts)
    }

    async fn staging_id_range(&self) -> Result<Option<IdRange>, StoreError> {
        let tables = self.tables.lock();
        let ids = tables.staging_trades.iter().map(|t| t.id);
        Ok(ids.clone().min().zip(ids.max()).map(|(min, max)| IdRange { min, max }))
    }

    async fn production_max_id(&self) -> Result<Option<i64>, StoreError> {
        Ok(self.tables.lock().trades.keys().next_back().copied())
    }

    async fn staging_anomalies(&self) -> Result<StagingAnomalies, StoreError> {
        let tables = self.tables.lock();
        let mut seen: HashMap<i64, u64> = HashMap::new();
        for trade in &tables.staging_trades {
            *seen.entry(trade.id).or_default() += 1;
        }
        let with_participants: HashSet<i64> = tables.staging_participants.iter().map(|p| p.trade_id).collect();

        Ok(StagingAnomalies {
            // ids are typed here, NULLs cannot reach memory staging
            null_ids: 0,
            duplicate_ids: seen.values().filter(|&&n| n > 1).count() as u64,
            orphan_participants: tables
                .staging_participants
                .iter()
                .filter(|p| !seen.contains_key(&p.trade_id))
                .count() as u64,
            trades_without_participants: seen.keys().filter(|id| !with_participants.contains(id)).count() as u64,
            oversized_fields: tables.staging_trades.iter().filter(|t| trade_oversized(t)).count() as u64
                + tables
                    .staging_participants
                    .iter()
                    .filter(|p| participant_oversized(p))
                    .count() as u64,
        })
    }

    async fn migrate_staging(&self) -> Result<StagingCounts, StoreError> {
        let mut tables = self.tables.lock();
        if std::mem::take(&mut tables.fail_next_migrate) {
            return Err(StoreError::Rejected("simulated migration failure".to_string()));
        }
        if let Some(dup) = tables
            .staging_trades
            .iter()
            .find(|t| tables.trades.contains_key(&t.id))
        {
            return Err(StoreError::Rejected(format!(
                "duplicate key value violates unique constraint \"trades_pkey\" (id={})",
                dup.id
            )));
        }

        let trades = tables.staging_trades.clone();
        let participants = tables.staging_participants.clone();
        let counts = StagingCounts {
            trades: trades.len() as u64,
            participants: participants.len() as u64,
        };
        tables.trades.extend(trades.into_iter().map(|t| (t.id, t)));
        tables.participants.extend(participants);
        Ok(counts)
    }

    async fn advance_sequence(&self) -> Result<Option<i64>, StoreError> {
        let mut tables = self.tables.lock();
        let max = tables.trades.keys().next_back().copied();
        if let Some(max) = max {
            tables.sequence = max;
        }
        Ok(max)
    }
}
