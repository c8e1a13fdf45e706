//! Environment-driven settings shared by the worker and the operator binaries.

use std::env;
use std::path::PathBuf;

use crate::error::ConfigError;
use crate::parsers::SourceFormat;
use crate::services::leaderboard::LeaderboardStrategy;

pub const DEFAULT_TRACKING_FILE: &str = "./last_trade_id.txt";
pub const DEFAULT_RAW_DATA_DIR: &str = "./raw";
pub const DEFAULT_CSV_OUTPUT_DIR: &str = "./csv_output";

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Option<String>,
    pub tracking_file: PathBuf,
    pub raw_data_dir: PathBuf,
    pub csv_output_dir: PathBuf,
    pub leaderboard_strategy: LeaderboardStrategy,
    pub leaderboard_interval_secs: u64,
    /// Source directory + format for the daily direct-insert sync, if enabled
    pub daily_sync: Option<(PathBuf, SourceFormat)>,
}

impl Settings {
    /// Load `.env` (if present) and read every setting from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let leaderboard_strategy = match env::var("LEADERBOARD_STRATEGY") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "LEADERBOARD_STRATEGY",
                value: raw,
            })?,
            Err(_) => LeaderboardStrategy::Incremental,
        };

        let leaderboard_interval_secs = match env::var("LEADERBOARD_INTERVAL_SECS") {
            Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                key: "LEADERBOARD_INTERVAL_SECS",
                value: raw,
            })?,
            Err(_) => 900,
        };

        let daily_sync = match env::var("DAILY_SYNC_SOURCE_DIR") {
            Ok(dir) => {
                let dir = PathBuf::from(dir);
                let format = match env::var("DAILY_SYNC_FORMAT") {
                    Ok(raw) => raw.parse().map_err(|_| ConfigError::Invalid {
                        key: "DAILY_SYNC_FORMAT",
                        value: raw,
                    })?,
                    Err(_) => SourceFormat::infer_from_path(&dir).ok_or(ConfigError::Missing("DAILY_SYNC_FORMAT"))?,
                };
                Some((dir, format))
            }
            Err(_) => None,
        };

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            tracking_file: env_path("TRADE_ID_TRACKING_FILE", DEFAULT_TRACKING_FILE),
            raw_data_dir: env_path("RAW_DATA_DIR", DEFAULT_RAW_DATA_DIR),
            csv_output_dir: env_path("CSV_OUTPUT_DIR", DEFAULT_CSV_OUTPUT_DIR),
            leaderboard_strategy,
            leaderboard_interval_secs,
            daily_sync,
        })
    }

    /// The database URL, or the fatal configuration error every live operation reports.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL"))
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_database_url_is_reported_by_name() {
        let settings = Settings {
            database_url: None,
            tracking_file: PathBuf::from(DEFAULT_TRACKING_FILE),
            raw_data_dir: PathBuf::from(DEFAULT_RAW_DATA_DIR),
            csv_output_dir: PathBuf::from(DEFAULT_CSV_OUTPUT_DIR),
            leaderboard_strategy: LeaderboardStrategy::Full,
            leaderboard_interval_secs: 60,
            daily_sync: None,
        };
        let err = settings.require_database_url().unwrap_err();
        assert_eq!(err.to_string(), "DATABASE_URL must be set");
    }
}
