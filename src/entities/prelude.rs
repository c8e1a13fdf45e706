pub use super::leaderboard_stats::Entity as LeaderboardStats;
pub use super::sync_status::Entity as SyncStatus;
pub use super::trade_participants::Entity as TradeParticipants;
pub use super::trades::Entity as Trades;
