use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(LeaderboardStats::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LeaderboardStats::UserAddress)
                            .string_len(66)
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(LeaderboardStats::TotalVolume).decimal().not_null())
                    .col(ColumnDef::new(LeaderboardStats::TotalTrades).big_integer().not_null())
                    .col(ColumnDef::new(LeaderboardStats::UniqueStrategies).big_integer().not_null())
                    .col(ColumnDef::new(LeaderboardStats::Rank).big_integer().not_null())
                    .col(
                        ColumnDef::new(LeaderboardStats::LastUpdated)
                            .timestamp()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_leaderboard_stats_rank")
                    .table(LeaderboardStats::Table)
                    .col(LeaderboardStats::Rank)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(LeaderboardStats::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum LeaderboardStats {
    Table,
    UserAddress,
    TotalVolume,
    TotalTrades,
    UniqueStrategies,
    Rank,
    LastUpdated,
}
