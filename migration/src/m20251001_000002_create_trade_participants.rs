use sea_orm_migration::prelude::*;

use super::m20251001_000001_create_trades::Trades;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(TradeParticipants::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(TradeParticipants::Id)
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(TradeParticipants::TradeId).big_integer().not_null())
                    .col(ColumnDef::new(TradeParticipants::UserAddress).string_len(66).not_null())
                    .col(ColumnDef::new(TradeParticipants::Side).string_len(1).not_null())
                    .col(ColumnDef::new(TradeParticipants::StartPos).decimal().not_null())
                    .col(ColumnDef::new(TradeParticipants::OrderId).big_integer().not_null())
                    .col(ColumnDef::new(TradeParticipants::StrategyId).big_integer().null())
                    .col(ColumnDef::new(TradeParticipants::ClientOrderId).string_len(66).null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_trade_participants_trade_id")
                            .from(TradeParticipants::Table, TradeParticipants::TradeId)
                            .to(Trades::Table, Trades::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        for (name, column) in [
            ("idx_trade_participants_trade_id", TradeParticipants::TradeId),
            ("idx_trade_participants_user_address", TradeParticipants::UserAddress),
            ("idx_trade_participants_strategy_id", TradeParticipants::StrategyId),
        ] {
            manager
                .create_index(
                    Index::create()
                        .name(name)
                        .table(TradeParticipants::Table)
                        .col(column)
                        .to_owned(),
                )
                .await?;
        }

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(TradeParticipants::Table).to_owned())
            .await
    }
}

#[derive(Iden)]
enum TradeParticipants {
    Table,
    Id,
    TradeId,
    UserAddress,
    Side,
    StartPos,
    OrderId,
    StrategyId,
    ClientOrderId,
}
