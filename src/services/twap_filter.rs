//! Ingestion eligibility: only trades with a TWAP participant are kept.

use crate::error::{IncompleteReason, IncompleteTradeError};
use crate::models::{ParticipantRecord, ReconstructedTrade, Side};

/// True when at least one participant carries a strategy id.
pub fn has_twap_id(participants: &[ParticipantRecord]) -> bool {
    participants.iter().any(|p| p.strategy_id.is_some())
}

/// Check that a trade is exactly one buyer and one seller.
pub fn check_complete(trade: &ReconstructedTrade) -> Result<(), IncompleteTradeError> {
    let participants = trade.participants.len();
    let reason = match participants {
        0 | 1 => Some(IncompleteReason::MissingCounterparty),
        2 => {
            let bids = trade.participants.iter().filter(|p| p.side == Side::Bid).count();
            (bids != 1).then_some(IncompleteReason::DuplicateSide)
        }
        _ => Some(IncompleteReason::TooManyParticipants),
    };

    match reason {
        None => Ok(()),
        Some(reason) => Err(IncompleteTradeError {
            tid: trade.tid,
            participants,
            reason,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn participant(side: Side, strategy_id: Option<i64>) -> ParticipantRecord {
        ParticipantRecord {
            user_address: "0xabc".to_string(),
            side,
            start_pos: Decimal::ZERO,
            order_id: 1,
            strategy_id,
            client_order_id: None,
        }
    }

    fn trade(participants: Vec<ParticipantRecord>) -> ReconstructedTrade {
        ReconstructedTrade {
            tid: Some(1),
            coin: "BTC".to_string(),
            time: "2025-10-06T00:00:00".to_string(),
            price: Decimal::ONE,
            size: Decimal::ONE,
            hash: "0x".to_string(),
            trade_dir_override: None,
            participants,
        }
    }

    #[test]
    fn keeps_iff_any_participant_is_tagged() {
        // every assignment of {none, some} over 0, 1 and 2 participants
        for count in 0..=2usize {
            for mask in 0..(1u32 << count) {
                let participants: Vec<_> = (0..count)
                    .map(|i| {
                        let tagged = mask & (1 << i) != 0;
                        participant(Side::Bid, tagged.then_some(i as i64 + 1))
                    })
                    .collect();
                assert_eq!(has_twap_id(&participants), mask != 0, "count={count} mask={mask}");
            }
        }
    }

    #[test]
    fn flags_each_incomplete_shape() {
        let one = trade(vec![participant(Side::Bid, Some(1))]);
        assert_eq!(
            check_complete(&one).unwrap_err().reason,
            IncompleteReason::MissingCounterparty
        );

        let same_side = trade(vec![participant(Side::Ask, Some(1)), participant(Side::Ask, None)]);
        assert_eq!(
            check_complete(&same_side).unwrap_err().reason,
            IncompleteReason::DuplicateSide
        );

        let three = trade(vec![
            participant(Side::Bid, Some(1)),
            participant(Side::Ask, None),
            participant(Side::Ask, None),
        ]);
        let err = check_complete(&three).unwrap_err();
        assert_eq!(err.reason, IncompleteReason::TooManyParticipants);
        assert_eq!(err.participants, 3);

        let pair = trade(vec![participant(Side::Bid, Some(1)), participant(Side::Ask, None)]);
        assert!(check_complete(&pair).is_ok());
    }
}
