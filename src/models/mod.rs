pub mod day;
pub mod leaderboard;
pub mod trade;

pub use day::DayKey;
pub use leaderboard::LeaderboardEntry;
pub use trade::{ParticipantRecord, ReconstructedTrade, Side};
