use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One ranked row of the leaderboard, identical for every refresh strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub rank: i64,
    pub user_address: String,
    pub total_volume: Decimal,
    pub total_trades: i64,
    pub unique_strategies: i64,
}
