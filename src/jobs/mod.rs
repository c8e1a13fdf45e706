pub mod daily_trade_sync;
pub mod leaderboard_sync;
