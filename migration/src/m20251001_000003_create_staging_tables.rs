use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Production columns without keys, constraints or length limits. Row checks happen at verify time.
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE UNLOGGED TABLE IF NOT EXISTS trades_staging (
                    id BIGINT,
                    coin TEXT,
                    time TIMESTAMP,
                    price NUMERIC,
                    size NUMERIC,
                    hash TEXT,
                    trade_dir_override TEXT
                );
                "#,
            )
            .await?;

        // id is filled on migrate by the production sequence
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE UNLOGGED TABLE IF NOT EXISTS trade_participants_staging (
                    id BIGINT,
                    trade_id BIGINT,
                    user_address TEXT,
                    side TEXT,
                    start_pos NUMERIC,
                    order_id BIGINT,
                    strategy_id BIGINT,
                    client_order_id TEXT
                );
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared("DROP TABLE IF EXISTS trade_participants_staging, trades_staging;")
            .await?;
        Ok(())
    }
}
