//! SeaORM Entity for trade_participants (one side of a trade)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "trade_participants")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub trade_id: i64,
    pub user_address: String,
    /// 'B' (bid/buy) or 'A' (ask/sell)
    pub side: String,
    #[sea_orm(column_type = "Decimal(None)")]
    pub start_pos: Decimal,
    pub order_id: i64,
    /// Parent TWAP strategy instance
    pub strategy_id: Option<i64>,
    pub client_order_id: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::trades::Entity",
        from = "Column::TradeId",
        to = "super::trades::Column::Id",
        on_delete = "Cascade"
    )]
    Trades,
}

impl Related<super::trades::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Trades.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
