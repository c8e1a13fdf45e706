//! SeaORM Entity for leaderboard_stats (ranked per-user TWAP volume)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "leaderboard_stats")]
pub struct Model {
    /// Lowercased wallet address
    #[sea_orm(primary_key, auto_increment = false)]
    pub user_address: String,
    #[sea_orm(column_type = "Decimal(None)")]
    pub total_volume: Decimal,
    pub total_trades: i64,
    pub unique_strategies: i64,
    /// Dense 1..N ordinal by descending volume
    pub rank: i64,
    pub last_updated: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
