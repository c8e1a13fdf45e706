//! Per-user volume leaderboard.
//!
//! All strategies rank the same way: `ROW_NUMBER()` over total notional volume descending, ties
//! broken by address ascending, users with zero volume left out.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{NaiveDateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ConnectionTrait, DatabaseBackend, DatabaseConnection, DbErr, FromQueryResult, Statement, TransactionTrait,
};
use serde::{Deserialize, Serialize};

use crate::models::LeaderboardEntry;

pub const STATS_TABLE: &str = "leaderboard_stats";
pub const MATERIALIZED_VIEW: &str = "leaderboard_mv";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderboardStrategy {
    /// Rebuild `leaderboard_stats` from the whole participant/trade join.
    Full,
    /// Recompute users touched since the last run, then re-rank everyone.
    Incremental,
    /// Refresh `leaderboard_mv`.
    MaterializedView,
}

impl fmt::Display for LeaderboardStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LeaderboardStrategy::Full => "full",
            LeaderboardStrategy::Incremental => "incremental",
            LeaderboardStrategy::MaterializedView => "materialized",
        };
        f.write_str(name)
    }
}

impl FromStr for LeaderboardStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(LeaderboardStrategy::Full),
            "incremental" | "delta" => Ok(LeaderboardStrategy::Incremental),
            "materialized" | "materialized_view" | "mv" => Ok(LeaderboardStrategy::MaterializedView),
            other => Err(format!("unknown leaderboard strategy `{}`", other)),
        }
    }
}

/// One participant's share of one trade.
#[derive(Debug, Clone)]
pub struct ParticipationFact {
    pub user_address: String,
    pub trade_id: i64,
    pub strategy_id: Option<i64>,
    pub notional: Decimal,
}

/// In-process equivalent of the SQL aggregation, for previews.
pub fn aggregate_leaderboard(facts: impl IntoIterator<Item = ParticipationFact>) -> Vec<LeaderboardEntry> {
    #[derive(Default)]
    struct Acc {
        volume: Decimal,
        trades: BTreeSet<i64>,
        strategies: BTreeSet<i64>,
    }

    let mut users: HashMap<String, Acc> = HashMap::new();
    for fact in facts {
        let acc = users.entry(fact.user_address.to_lowercase()).or_default();
        acc.volume += fact.notional;
        acc.trades.insert(fact.trade_id);
        if let Some(strategy) = fact.strategy_id {
            acc.strategies.insert(strategy);
        }
    }

    let mut entries: Vec<LeaderboardEntry> = users
        .into_iter()
        .filter(|(_, acc)| !acc.volume.is_zero())
        .map(|(user_address, acc)| LeaderboardEntry {
            rank: 0,
            user_address,
            total_volume: acc.volume,
            total_trades: acc.trades.len() as i64,
            unique_strategies: acc.strategies.len() as i64,
        })
        .collect();

    entries.sort_by(|a, b| {
        b.total_volume
            .cmp(&a.total_volume)
            .then_with(|| a.user_address.cmp(&b.user_address))
    });
    for (i, entry) in entries.iter_mut().enumerate() {
        entry.rank = i as i64 + 1;
    }
    entries
}

const USER_AGGREGATE: &str = r#"
    SELECT lower(p.user_address) AS user_address,
           SUM(t.price * t.size) AS total_volume,
           COUNT(DISTINCT p.trade_id) AS total_trades,
           COUNT(DISTINCT p.strategy_id) AS unique_strategies
    FROM trade_participants p
    JOIN trades t ON t.id = p.trade_id
"#;

#[derive(Debug, Clone, Serialize)]
pub struct RefreshOutcome {
    /// Strategy that actually ran (incremental without a previous run falls back to full)
    pub strategy: LeaderboardStrategy,
    pub started_at: NaiveDateTime,
    pub users_written: u64,
}

#[derive(Debug, FromQueryResult)]
struct EntryRow {
    rank: i64,
    user_address: String,
    total_volume: Decimal,
    total_trades: i64,
    unique_strategies: i64,
}

#[derive(Debug, FromQueryResult)]
struct Populated {
    populated: bool,
}

pub struct LeaderboardService {
    db: DatabaseConnection,
}

impl LeaderboardService {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Recompute with `strategy`. `since` is the start of the last successful incremental run.
    pub async fn refresh(
        &self,
        strategy: LeaderboardStrategy,
        since: Option<NaiveDateTime>,
    ) -> Result<RefreshOutcome, DbErr> {
        let started_at = Utc::now().naive_utc();
        let (strategy, users_written) = match (strategy, since) {
            (LeaderboardStrategy::Full, _) => (strategy, self.full().await?),
            (LeaderboardStrategy::Incremental, Some(since)) => (strategy, self.incremental(since).await?),
            (LeaderboardStrategy::Incremental, None) => {
                tracing::warn!("No previous leaderboard run recorded, bootstrapping with a full recompute");
                (LeaderboardStrategy::Full, self.full().await?)
            }
            (LeaderboardStrategy::MaterializedView, _) => (strategy, self.refresh_view().await?),
        };

        tracing::info!(%strategy, users = users_written, "Leaderboard refreshed");
        Ok(RefreshOutcome {
            strategy,
            started_at,
            users_written,
        })
    }

    async fn full(&self) -> Result<u64, DbErr> {
        let txn = self.db.begin().await?;
        txn.execute_unprepared("SET LOCAL statement_timeout = 0").await?;
        txn.execute_unprepared("DELETE FROM leaderboard_stats").await?;
        let inserted = txn
            .execute_unprepared(&format!(
                r#"
                INSERT INTO leaderboard_stats
                    (user_address, total_volume, total_trades, unique_strategies, rank, last_updated)
                SELECT user_address, total_volume, total_trades, unique_strategies,
                       ROW_NUMBER() OVER (ORDER BY total_volume DESC, user_address ASC),
                       NOW() AT TIME ZONE 'UTC'
                FROM ({USER_AGGREGATE} GROUP BY lower(p.user_address) HAVING SUM(t.price * t.size) <> 0) a
                "#
            ))
            .await?
            .rows_affected();
        txn.commit().await?;
        Ok(inserted)
    }

    async fn incremental(&self, since: NaiveDateTime) -> Result<u64, DbErr> {
        let txn = self.db.begin().await?;
        txn.execute_unprepared("SET LOCAL statement_timeout = 0").await?;

        let touched = r#"
            SELECT DISTINCT lower(p.user_address)
            FROM trade_participants p
            JOIN trades t ON t.id = p.trade_id
            WHERE t.time > $1
        "#;

        txn.execute(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            format!("DELETE FROM leaderboard_stats WHERE user_address IN ({touched})"),
            [since.into()],
        ))
        .await?;

        // rank 0 until the global re-rank below
        let written = txn
            .execute(Statement::from_sql_and_values(
                DatabaseBackend::Postgres,
                format!(
                    r#"
                    INSERT INTO leaderboard_stats
                        (user_address, total_volume, total_trades, unique_strategies, rank, last_updated)
                    SELECT user_address, total_volume, total_trades, unique_strategies, 0, NOW() AT TIME ZONE 'UTC'
                    FROM (
                        {USER_AGGREGATE}
                        WHERE lower(p.user_address) IN ({touched})
                        GROUP BY lower(p.user_address)
                        HAVING SUM(t.price * t.size) <> 0
                    ) a
                    "#
                ),
                [since.into()],
            ))
            .await?
            .rows_affected();

        txn.execute_unprepared(
            r#"
            UPDATE leaderboard_stats s
            SET rank = r.rank
            FROM (
                SELECT user_address,
                       ROW_NUMBER() OVER (ORDER BY total_volume DESC, user_address ASC) AS rank
                FROM leaderboard_stats
            ) r
            WHERE s.user_address = r.user_address AND s.rank <> r.rank
            "#,
        )
        .await?;

        txn.commit().await?;
        Ok(written)
    }

    async fn refresh_view(&self) -> Result<u64, DbErr> {
        let populated = Populated::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            "SELECT relispopulated AS populated FROM pg_class WHERE relname = $1",
            [MATERIALIZED_VIEW.into()],
        ))
        .one(&self.db)
        .await?
        .is_some_and(|p| p.populated);

        // CONCURRENTLY needs an already populated view
        let sql = if populated {
            format!("REFRESH MATERIALIZED VIEW CONCURRENTLY {MATERIALIZED_VIEW}")
        } else {
            tracing::info!("First materialized view refresh, readers will block until it completes");
            format!("REFRESH MATERIALIZED VIEW {MATERIALIZED_VIEW}")
        };
        self.db.execute_unprepared(&sql).await?;

        let count = self
            .db
            .query_one(Statement::from_string(
                DatabaseBackend::Postgres,
                format!("SELECT COUNT(*) AS count FROM {MATERIALIZED_VIEW}"),
            ))
            .await?
            .map(|row| row.try_get::<i64>("", "count"))
            .transpose()?
            .unwrap_or_default();
        Ok(count as u64)
    }

    /// Highest ranked users, read from whichever relation `strategy` maintains.
    pub async fn top(&self, strategy: LeaderboardStrategy, limit: u64) -> Result<Vec<LeaderboardEntry>, DbErr> {
        let source = match strategy {
            LeaderboardStrategy::MaterializedView => MATERIALIZED_VIEW,
            LeaderboardStrategy::Full | LeaderboardStrategy::Incremental => STATS_TABLE,
        };
        let rows = EntryRow::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            format!(
                "SELECT rank, user_address, total_volume, total_trades, unique_strategies \
                 FROM {source} ORDER BY rank ASC LIMIT $1"
            ),
            [(limit as i64).into()],
        ))
        .all(&self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| LeaderboardEntry {
                rank: r.rank,
                user_address: r.user_address,
                total_volume: r.total_volume,
                total_trades: r.total_trades,
                unique_strategies: r.unique_strategies,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn fact(user: &str, trade_id: i64, strategy_id: Option<i64>, notional: Decimal) -> ParticipationFact {
        ParticipationFact {
            user_address: user.to_string(),
            trade_id,
            strategy_id,
            notional,
        }
    }

    #[test]
    fn ranks_by_volume_then_address() {
        let entries = aggregate_leaderboard(vec![
            fact("0xB", 1, Some(7), dec!(100)),
            fact("0xa", 1, None, dec!(100)),
            fact("0xc", 2, Some(8), dec!(250)),
            fact("0xb", 3, Some(9), dec!(50)),
        ]);

        let ranked: Vec<(i64, &str)> = entries.iter().map(|e| (e.rank, e.user_address.as_str())).collect();
        assert_eq!(ranked, [(1, "0xc"), (2, "0xb"), (3, "0xa")]);

        let b = &entries[1];
        assert_eq!(b.total_volume, dec!(150));
        assert_eq!(b.total_trades, 2);
        assert_eq!(b.unique_strategies, 2);
        assert_eq!(entries[2].unique_strategies, 0);
    }

    #[test]
    fn ties_break_on_address_and_zero_volume_is_dropped() {
        let entries = aggregate_leaderboard(vec![
            fact("0xd", 1, None, dec!(10)),
            fact("0xa", 2, None, dec!(10)),
            fact("0xz", 3, None, dec!(0)),
        ]);
        let ranked: Vec<(i64, &str)> = entries.iter().map(|e| (e.rank, e.user_address.as_str())).collect();
        assert_eq!(ranked, [(1, "0xa"), (2, "0xd")]);
    }

    #[test]
    fn repeated_participation_counts_trade_once() {
        let entries = aggregate_leaderboard(vec![fact("0xa", 1, Some(1), dec!(5)), fact("0xa", 1, Some(1), dec!(5))]);
        assert_eq!(entries[0].total_trades, 1);
        assert_eq!(entries[0].total_volume, dec!(10));
    }

    #[test]
    fn strategy_names_parse() {
        assert_eq!("full".parse::<LeaderboardStrategy>().unwrap(), LeaderboardStrategy::Full);
        assert_eq!("Delta".parse::<LeaderboardStrategy>().unwrap(), LeaderboardStrategy::Incremental);
        assert_eq!(
            "materialized".parse::<LeaderboardStrategy>().unwrap(),
            LeaderboardStrategy::MaterializedView
        );
        assert!("weekly".parse::<LeaderboardStrategy>().is_err());
        assert_eq!(LeaderboardStrategy::MaterializedView.to_string(), "materialized");
    }
}
