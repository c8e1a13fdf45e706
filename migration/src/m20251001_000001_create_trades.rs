use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Bulk loads insert explicit ids; direct inserts take the next sequence value
        manager
            .create_table(
                Table::create()
                    .table(Trades::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Trades::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Trades::Coin).string_len(64).not_null())
                    .col(ColumnDef::new(Trades::Time).timestamp().not_null())
                    .col(ColumnDef::new(Trades::Price).decimal().not_null())
                    .col(ColumnDef::new(Trades::Size).decimal().not_null())
                    .col(ColumnDef::new(Trades::Hash).string_len(66).not_null())
                    .col(ColumnDef::new(Trades::TradeDirOverride).string_len(32).null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_trades_time")
                    .table(Trades::Table)
                    .col(Trades::Time)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_trades_coin_time")
                    .table(Trades::Table)
                    .col(Trades::Coin)
                    .col(Trades::Time)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Trades::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
pub enum Trades {
    Table,
    Id,
    Coin,
    Time,
    Price,
    Size,
    Hash,
    TradeDirOverride,
}
