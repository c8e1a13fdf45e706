//! `node_trades` lines: one trade per line.
//!
//! ```json
//! {"coin":"BTC","side":"A","time":"2025-10-06T12:00:00.123","px":"62000.5","sz":"0.01",
//!  "hash":"0x..","trade_dir_override":"Na",
//!  "side_info":[{"user":"0xA","start_pos":"0","oid":1,"twap_id":7,"cloid":null},
//!               {"user":"0xB","start_pos":"1.5","oid":2,"twap_id":null,"cloid":null}]}
//! ```
//!
//! `side_info` carries no side tag. Upstream documents entry 0 as the buyer and entry 1 as
//! the seller; the top-level `side` is the aggressor and must not be used for participants.

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ParseError;
use crate::models::{ParticipantRecord, ReconstructedTrade, Side};

use super::{pass_through_time, RecordParser, SourceFormat};

#[derive(Debug, Deserialize)]
struct RawTrade {
    coin: Option<String>,
    time: Option<String>,
    px: Option<Decimal>,
    sz: Option<Decimal>,
    hash: Option<String>,
    #[serde(default)]
    trade_dir_override: Option<String>,
    side_info: Option<Vec<RawSideInfo>>,
}

#[derive(Debug, Deserialize)]
struct RawSideInfo {
    user: Option<String>,
    start_pos: Option<Decimal>,
    oid: Option<i64>,
    #[serde(default)]
    twap_id: Option<i64>,
    #[serde(default)]
    cloid: Option<String>,
}

/// Position in `side_info` to side. Only positions 0 and 1 exist in this format.
pub fn side_from_position(index: usize) -> Option<Side> {
    match index {
        0 => Some(Side::Bid),
        1 => Some(Side::Ask),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NodeTradesParser;

impl RecordParser for NodeTradesParser {
    fn format(&self) -> SourceFormat {
        SourceFormat::NodeTrades
    }

    fn parse_line(&self, raw: &str) -> Result<Vec<ReconstructedTrade>, ParseError> {
        let record: RawTrade = serde_json::from_str(raw)?;

        let side_info = record.side_info.ok_or(ParseError::MissingField("side_info"))?;
        if side_info.len() != 2 {
            return Err(ParseError::UnexpectedSideCount(side_info.len()));
        }

        let mut participants = Vec::with_capacity(2);
        for (index, info) in side_info.into_iter().enumerate() {
            let side = side_from_position(index).ok_or(ParseError::UnexpectedSideCount(index + 1))?;
            participants.push(ParticipantRecord {
                user_address: info.user.ok_or(ParseError::MissingField("side_info.user"))?,
                side,
                start_pos: info.start_pos.ok_or(ParseError::MissingField("side_info.start_pos"))?,
                order_id: info.oid.ok_or(ParseError::MissingField("side_info.oid"))?,
                strategy_id: info.twap_id,
                client_order_id: info.cloid,
            });
        }

        let time = record.time.ok_or(ParseError::MissingField("time"))?;

        Ok(vec![ReconstructedTrade {
            tid: None,
            coin: record.coin.ok_or(ParseError::MissingField("coin"))?,
            time: pass_through_time(&time)?,
            price: record.px.ok_or(ParseError::MissingField("px"))?,
            size: record.sz.ok_or(ParseError::MissingField("sz"))?,
            hash: record.hash.ok_or(ParseError::MissingField("hash"))?,
            trade_dir_override: record.trade_dir_override,
            participants,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn line(top_side: &str, twap_a: &str, twap_b: &str) -> String {
        format!(
            r#"{{"coin":"BTC","side":"{top_side}","time":"2025-10-06T12:00:00.123","px":"62000.5","sz":"0.01","hash":"0xabc","trade_dir_override":"Na","side_info":[{{"user":"0xA","start_pos":"0","oid":11,"twap_id":{twap_a},"cloid":null}},{{"user":"0xB","start_pos":"1.5","oid":12,"twap_id":{twap_b},"cloid":"0xc1"}}]}}"#
        )
    }

    #[test]
    fn first_entry_is_buyer_regardless_of_top_level_side() {
        for top_side in ["A", "B"] {
            let trades = NodeTradesParser.parse_line(&line(top_side, "7", "null")).unwrap();
            assert_eq!(trades.len(), 1);
            let p = &trades[0].participants;
            assert_eq!(p[0].user_address, "0xA");
            assert_eq!(p[0].side, Side::Bid);
            assert_eq!(p[1].user_address, "0xB");
            assert_eq!(p[1].side, Side::Ask);
        }
    }

    #[test]
    fn copies_trade_fields_verbatim() {
        let trade = NodeTradesParser
            .parse_line(&line("A", "7", "null"))
            .unwrap()
            .remove(0);
        assert_eq!(trade.coin, "BTC");
        assert_eq!(trade.time, "2025-10-06T12:00:00.123");
        assert_eq!(trade.price, dec!(62000.5));
        assert_eq!(trade.size, dec!(0.01));
        assert_eq!(trade.trade_dir_override.as_deref(), Some("Na"));
        assert_eq!(trade.participants[0].strategy_id, Some(7));
        assert_eq!(trade.participants[1].client_order_id.as_deref(), Some("0xc1"));
        assert_eq!(trade.participants[1].start_pos, dec!(1.5));
    }

    #[test]
    fn twap_filter_drops_untagged_trades() {
        let parsed = NodeTradesParser
            .parse_twap_line(&line("A", "null", "null"))
            .unwrap();
        assert!(parsed.accepted.is_empty());
        assert_eq!(parsed.skipped, 1);
    }

    #[test]
    fn rejects_malformed_lines() {
        assert!(matches!(
            NodeTradesParser.parse_line("{\"coin\":"),
            Err(ParseError::Json(_))
        ));
        assert!(matches!(
            NodeTradesParser.parse_line(r#"{"coin":"BTC","time":"2025-10-06T12:00:00","px":"1","sz":"1","hash":"0x"}"#),
            Err(ParseError::MissingField("side_info"))
        ));
        let one_side = r#"{"coin":"BTC","time":"2025-10-06T12:00:00","px":"1","sz":"1","hash":"0x","side_info":[{"user":"0xA","start_pos":"0","oid":1}]}"#;
        assert!(matches!(
            NodeTradesParser.parse_line(one_side),
            Err(ParseError::UnexpectedSideCount(1))
        ));
    }
}
