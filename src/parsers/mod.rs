//! Raw export parsers.
//!
//! The exchange changed its export schema over time, so there are two line formats that feed
//! the same downstream filter/allocate/emit pipeline:
//! - `node_trades`: one trade event per line, sides given positionally in `side_info`
//! - `node_fills_by_block`: one block per line, fills keyed by user, grouped into trades by `tid`

use std::path::Path;

use chrono::DateTime;

use crate::error::ParseError;
use crate::models::{trade::parse_iso_time, ReconstructedTrade};
use crate::services::twap_filter::has_twap_id;

pub mod fills_by_block;
pub mod node_trades;

pub use fills_by_block::FillsByBlockParser;
pub use node_trades::NodeTradesParser;

/// Output of one raw line after the TWAP filter.
#[derive(Debug, Default)]
pub struct ParsedLine {
    pub accepted: Vec<ReconstructedTrade>,
    /// Trades reconstructed from the line with no strategy id on any participant
    pub skipped: usize,
}

pub trait RecordParser {
    fn format(&self) -> SourceFormat;

    /// Decode one raw line into zero or more reconstructed trades.
    fn parse_line(&self, raw: &str) -> Result<Vec<ReconstructedTrade>, ParseError>;

    /// `parse_line` followed by the TWAP filter.
    fn parse_twap_line(&self, raw: &str) -> Result<ParsedLine, ParseError> {
        let mut parsed = ParsedLine::default();
        for trade in self.parse_line(raw)? {
            if has_twap_id(&trade.participants) {
                parsed.accepted.push(trade);
            } else {
                parsed.skipped += 1;
            }
        }
        Ok(parsed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFormat {
    NodeTrades,
    NodeFillsByBlock,
}

impl SourceFormat {
    pub const ALL: [SourceFormat; 2] = [SourceFormat::NodeTrades, SourceFormat::NodeFillsByBlock];

    /// Directory name used both for raw sources and for CSV output sub-directories.
    pub fn dir_name(&self) -> &'static str {
        match self {
            SourceFormat::NodeTrades => "node_trades",
            SourceFormat::NodeFillsByBlock => "node_fills_by_block",
        }
    }

    /// Guess the format from any path component naming it.
    pub fn infer_from_path(path: &Path) -> Option<Self> {
        path.components().rev().find_map(|component| {
            let name = component.as_os_str().to_str()?;
            Self::ALL.into_iter().find(|format| name == format.dir_name())
        })
    }

    pub fn parser(&self) -> Parser {
        match self {
            SourceFormat::NodeTrades => Parser::NodeTrades(NodeTradesParser),
            SourceFormat::NodeFillsByBlock => Parser::FillsByBlock(FillsByBlockParser),
        }
    }
}

impl std::fmt::Display for SourceFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl std::str::FromStr for SourceFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "node_trades" | "trades" => Ok(SourceFormat::NodeTrades),
            "node_fills_by_block" | "fills_by_block" | "fills" => Ok(SourceFormat::NodeFillsByBlock),
            _ => Err(format!("Unknown source format: {}", s)),
        }
    }
}

/// The two parser variants behind one interface.
#[derive(Debug, Clone, Copy)]
pub enum Parser {
    NodeTrades(NodeTradesParser),
    FillsByBlock(FillsByBlockParser),
}

impl RecordParser for Parser {
    fn format(&self) -> SourceFormat {
        match self {
            Parser::NodeTrades(p) => p.format(),
            Parser::FillsByBlock(p) => p.format(),
        }
    }

    fn parse_line(&self, raw: &str) -> Result<Vec<ReconstructedTrade>, ParseError> {
        match self {
            Parser::NodeTrades(p) => p.parse_line(raw),
            Parser::FillsByBlock(p) => p.parse_line(raw),
        }
    }
}

/// Validate a textual timestamp and return it unchanged.
pub(crate) fn pass_through_time(raw: &str) -> Result<String, ParseError> {
    match parse_iso_time(raw) {
        Some(_) => Ok(raw.to_string()),
        None => Err(ParseError::InvalidTime(raw.to_string())),
    }
}

/// Epoch milliseconds to `YYYY-MM-DDTHH:MM:SS.mmm` (UTC).
pub(crate) fn epoch_ms_to_iso(ms: i64) -> Result<String, ParseError> {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.naive_utc().format("%Y-%m-%dT%H:%M:%S%.3f").to_string())
        .ok_or_else(|| ParseError::InvalidTime(ms.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn infers_format_from_source_directory() {
        let path = PathBuf::from("/data/hl/node_fills_by_block/hourly/20251006");
        assert_eq!(
            SourceFormat::infer_from_path(&path),
            Some(SourceFormat::NodeFillsByBlock)
        );
        assert_eq!(
            SourceFormat::infer_from_path(&PathBuf::from("/data/node_trades")),
            Some(SourceFormat::NodeTrades)
        );
        assert_eq!(SourceFormat::infer_from_path(&PathBuf::from("/data/other")), None);
    }

    #[test]
    fn epoch_millis_become_iso_text() {
        assert_eq!(
            epoch_ms_to_iso(1_759_752_000_123).unwrap(),
            "2025-10-06T12:00:00.123"
        );
    }

    #[test]
    fn textual_time_passes_through_verbatim() {
        let raw = "2025-10-06T12:00:00.123456";
        assert_eq!(pass_through_time(raw).unwrap(), raw);
        assert!(pass_through_time("not a time").is_err());
    }
}
