//! SeaORM Entity for the trades table (one matched execution)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "trades")]
pub struct Model {
    /// Allocated by the ingestion pipeline for bulk loads, by the sequence for direct inserts
    #[sea_orm(primary_key)]
    pub id: i64,
    pub coin: String,
    pub time: DateTime,
    #[sea_orm(column_type = "Decimal(None)")]
    pub price: Decimal,
    #[sea_orm(column_type = "Decimal(None)")]
    pub size: Decimal,
    /// Source transaction hash, a correlation key only (not unique)
    pub hash: String,
    pub trade_dir_override: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::trade_participants::Entity")]
    TradeParticipants,
}

impl Related<super::trade_participants::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::TradeParticipants.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
