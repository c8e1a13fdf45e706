// src/lib.rs

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod config;
pub mod error;

pub mod entities {
    pub mod prelude;
    pub mod leaderboard_stats;
    pub mod sync_status;
    pub mod trade_participants;
    pub mod trades;
}

pub mod models;
pub mod parsers;

pub mod services {
    pub mod archive;
    pub mod csv_emitter;
    pub mod day_processor;
    pub mod id_allocator;
    pub mod leaderboard;
    pub mod progress;
    pub mod retry;
    pub mod staged_migrator;
    pub mod sync_status;
    pub mod trade_store;
    pub mod trade_writer;
    pub mod twap_filter;
}

pub mod jobs;

/// Install the fmt subscriber used by every binary.
///
/// `RUST_LOG` wins over `default_filter` when set.
pub fn init_tracing(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

pub const DEFAULT_LOG_FILTER: &str = "info,twap_ingest=debug,sqlx=warn";
