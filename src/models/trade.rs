//! Reconstructed trades and their participants, the unit passed from the parsers to the emitter.

use chrono::NaiveDateTime;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of a participant, stored as the exchange's one-letter tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    /// Bid / buy, tag `B`
    #[serde(rename = "B")]
    Bid,
    /// Ask / sell, tag `A`
    #[serde(rename = "A")]
    Ask,
}

impl Side {
    pub fn tag(&self) -> &'static str {
        match self {
            Side::Bid => "B",
            Side::Ask => "A",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl std::str::FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "b" | "bid" | "buy" => Ok(Side::Bid),
            "a" | "ask" | "sell" => Ok(Side::Ask),
            _ => Err(format!("Unknown side: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub user_address: String,
    pub side: Side,
    /// Position size immediately before this fill
    pub start_pos: Decimal,
    pub order_id: i64,
    /// Parent TWAP strategy instance (`twap_id` upstream)
    pub strategy_id: Option<i64>,
    pub client_order_id: Option<String>,
}

/// A trade rebuilt from raw records, before an id is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructedTrade {
    /// Upstream trade id, when the source format carries one
    pub tid: Option<i64>,
    pub coin: String,
    /// ISO-8601 execution time (UTC)
    pub time: String,
    pub price: Decimal,
    pub size: Decimal,
    pub hash: String,
    pub trade_dir_override: Option<String>,
    pub participants: Vec<ParticipantRecord>,
}

impl ReconstructedTrade {
    /// Parse `time` for the direct insert path.
    pub fn time_utc(&self) -> Option<NaiveDateTime> {
        parse_iso_time(&self.time)
    }

    pub fn notional(&self) -> Decimal {
        self.price * self.size
    }
}

/// Accepts `2025-10-06T12:00:00`, fractional seconds, and an optional trailing `Z`.
pub fn parse_iso_time(raw: &str) -> Option<NaiveDateTime> {
    let trimmed = raw.trim().trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}
