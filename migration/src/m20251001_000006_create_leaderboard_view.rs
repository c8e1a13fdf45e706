use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Same shape and ranking as leaderboard_stats; first REFRESH populates it
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE MATERIALIZED VIEW IF NOT EXISTS leaderboard_mv AS
                SELECT
                    user_address,
                    total_volume,
                    total_trades,
                    unique_strategies,
                    ROW_NUMBER() OVER (ORDER BY total_volume DESC, user_address ASC) AS rank,
                    NOW() AT TIME ZONE 'UTC' AS last_updated
                FROM (
                    SELECT
                        lower(p.user_address) AS user_address,
                        SUM(t.price * t.size) AS total_volume,
                        COUNT(DISTINCT p.trade_id) AS total_trades,
                        COUNT(DISTINCT p.strategy_id) AS unique_strategies
                    FROM trade_participants p
                    JOIN trades t ON t.id = p.trade_id
                    GROUP BY lower(p.user_address)
                    HAVING SUM(t.price * t.size) <> 0
                ) a
                WITH NO DATA;
                "#,
            )
            .await?;

        // REFRESH ... CONCURRENTLY requires a unique index
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE UNIQUE INDEX IF NOT EXISTS idx_leaderboard_mv_user_address
                ON leaderboard_mv (user_address);
                CREATE INDEX IF NOT EXISTS idx_leaderboard_mv_rank
                ON leaderboard_mv (rank);
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP MATERIALIZED VIEW IF EXISTS leaderboard_mv;")
            .await?;
        Ok(())
    }
}
