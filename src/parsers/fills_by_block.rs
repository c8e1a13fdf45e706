//! `node_fills_by_block` lines: one block per line, each fill paired with its user.
//!
//! ```json
//! {"block_number":1,"block_time":"2025-10-06T12:00:00.5","events":[
//!   ["0xA",{"coin":"BTC","px":"62000.5","sz":"0.01","side":"B","time":1759752000123,
//!           "startPosition":"0","hash":"0x..","oid":11,"tid":77,"cloid":null,"twapId":7}],
//!   ["0xB",{"coin":"BTC","px":"62000.5","sz":"0.01","side":"A","time":1759752000123,
//!           "startPosition":"1.5","hash":"0x..","oid":12,"tid":77,"cloid":null,"twapId":null}]]}
//! ```
//!
//! Every fill of a trade carries the same `tid`; a trade is rebuilt by grouping the block's
//! fills on it. Groups keep the order in which their first fill appears in the block.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ParseError;
use crate::models::{ParticipantRecord, ReconstructedTrade, Side};

use super::{epoch_ms_to_iso, RecordParser, SourceFormat};

#[derive(Debug, Deserialize)]
struct RawBlock {
    events: Option<Vec<(String, RawFill)>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFill {
    coin: Option<String>,
    px: Option<Decimal>,
    sz: Option<Decimal>,
    side: Option<String>,
    time: Option<i64>,
    start_position: Option<Decimal>,
    hash: Option<String>,
    oid: Option<i64>,
    tid: Option<i64>,
    #[serde(default)]
    cloid: Option<String>,
    #[serde(default)]
    twap_id: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FillsByBlockParser;

impl RecordParser for FillsByBlockParser {
    fn format(&self) -> SourceFormat {
        SourceFormat::NodeFillsByBlock
    }

    fn parse_line(&self, raw: &str) -> Result<Vec<ReconstructedTrade>, ParseError> {
        let block: RawBlock = serde_json::from_str(raw)?;
        let events = block.events.ok_or(ParseError::MissingField("events"))?;

        let mut trades: Vec<ReconstructedTrade> = Vec::new();
        let mut by_tid: HashMap<i64, usize> = HashMap::new();

        for (user, fill) in events {
            let tid = fill.tid.ok_or(ParseError::MissingField("tid"))?;
            let side_raw = fill.side.ok_or(ParseError::MissingField("side"))?;
            let side: Side = side_raw
                .parse()
                .map_err(|_| ParseError::InvalidSide(side_raw.clone()))?;

            let participant = ParticipantRecord {
                user_address: user,
                side,
                start_pos: fill.start_position.ok_or(ParseError::MissingField("startPosition"))?,
                order_id: fill.oid.ok_or(ParseError::MissingField("oid"))?,
                strategy_id: fill.twap_id,
                client_order_id: fill.cloid,
            };

            if let Some(&index) = by_tid.get(&tid) {
                trades[index].participants.push(participant);
                continue;
            }

            let time_ms = fill.time.ok_or(ParseError::MissingField("time"))?;
            by_tid.insert(tid, trades.len());
            trades.push(ReconstructedTrade {
                tid: Some(tid),
                coin: fill.coin.ok_or(ParseError::MissingField("coin"))?,
                time: epoch_ms_to_iso(time_ms)?,
                price: fill.px.ok_or(ParseError::MissingField("px"))?,
                size: fill.sz.ok_or(ParseError::MissingField("sz"))?,
                hash: fill.hash.ok_or(ParseError::MissingField("hash"))?,
                trade_dir_override: None,
                participants: vec![participant],
            });
        }

        Ok(trades)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(user: &str, side: &str, tid: i64, twap: &str) -> String {
        format!(
            r#"["{user}",{{"coin":"ETH","px":"2500.1","sz":"0.4","side":"{side}","time":1759752000123,"startPosition":"0","dir":"Open Long","hash":"0xh{tid}","oid":5,"tid":{tid},"cloid":null,"twapId":{twap}}}]"#
        )
    }

    fn block(events: &[String]) -> String {
        format!(
            r#"{{"local_time":"2025-10-06T12:00:00.6","block_time":"2025-10-06T12:00:00.5","block_number":42,"events":[{}]}}"#,
            events.join(",")
        )
    }

    #[test]
    fn groups_fills_sharing_a_tid() {
        let raw = block(&[
            event("0xA", "B", 77, "9"),
            event("0xB", "A", 77, "null"),
            event("0xC", "A", 78, "3"),
            event("0xD", "B", 77, "null"),
        ]);
        let trades = FillsByBlockParser.parse_line(&raw).unwrap();
        assert_eq!(trades.len(), 2);
        assert_eq!(trades[0].tid, Some(77));
        assert_eq!(trades[0].participants.len(), 3);
        assert_eq!(trades[1].tid, Some(78));
        assert_eq!(trades[1].participants.len(), 1);
    }

    #[test]
    fn side_comes_from_the_fill_not_its_position() {
        let raw = block(&[event("0xS", "A", 1, "4"), event("0xB", "B", 1, "null")]);
        let trade = FillsByBlockParser.parse_line(&raw).unwrap().remove(0);
        assert_eq!(trade.participants[0].side, Side::Ask);
        assert_eq!(trade.participants[1].side, Side::Bid);
        assert_eq!(trade.time, "2025-10-06T12:00:00.123");
        assert_eq!(trade.trade_dir_override, None);
    }

    #[test]
    fn empty_block_yields_nothing() {
        assert!(FillsByBlockParser.parse_line(&block(&[])).unwrap().is_empty());
    }

    #[test]
    fn filter_counts_untagged_groups() {
        let raw = block(&[
            event("0xA", "B", 1, "null"),
            event("0xB", "A", 1, "null"),
            event("0xC", "B", 2, "12"),
            event("0xD", "A", 2, "null"),
        ]);
        let parsed = FillsByBlockParser.parse_twap_line(&raw).unwrap();
        assert_eq!(parsed.skipped, 1);
        assert_eq!(parsed.accepted.len(), 1);
        assert_eq!(parsed.accepted[0].tid, Some(2));
    }

    #[test]
    fn rejects_unknown_side_and_missing_tid() {
        let bad_side = block(&[event("0xA", "Z", 1, "1")]);
        assert!(matches!(
            FillsByBlockParser.parse_line(&bad_side),
            Err(ParseError::InvalidSide(_))
        ));
        let no_tid = r#"{"events":[["0xA",{"coin":"ETH","px":"1","sz":"1","side":"B","time":1,"startPosition":"0","hash":"0x","oid":1}]]}"#;
        assert!(matches!(
            FillsByBlockParser.parse_line(no_tid),
            Err(ParseError::MissingField("tid"))
        ));
    }
}
