//! Direct (non-bulk) insert path for small batches such as the daily sync.
//!
//! Ids come from the `trades` sequence, which the bulk import advances past every bulk-loaded id.

use chrono::NaiveDateTime;
use sea_orm::{ActiveModelTrait, ConnectionTrait, DatabaseTransaction, DbErr, EntityTrait, Set};
use serde::Serialize;

use crate::entities::{trade_participants, trades};
use crate::entities::prelude::{TradeParticipants, Trades};
use crate::error::StoreError;
use crate::models::ReconstructedTrade;

fn validate(trade: &ReconstructedTrade) -> Result<NaiveDateTime, StoreError> {
    let time = trade
        .time_utc()
        .ok_or_else(|| StoreError::Rejected(format!("invalid trade time `{}`", trade.time)))?;
    if trade.participants.is_empty() {
        return Err(StoreError::Rejected(format!("trade {} has no participants", trade.hash)));
    }
    Ok(time)
}

async fn insert_trade_row<C>(db: &C, trade: &ReconstructedTrade, time: NaiveDateTime) -> Result<i64, DbErr>
where
    C: ConnectionTrait,
{
    let inserted = trades::ActiveModel {
        coin: Set(trade.coin.clone()),
        time: Set(time),
        price: Set(trade.price),
        size: Set(trade.size),
        hash: Set(trade.hash.clone()),
        trade_dir_override: Set(trade.trade_dir_override.clone()),
        ..Default::default()
    }
    .insert(db)
    .await?;
    Ok(inserted.id)
}

async fn insert_participants<C>(db: &C, trade_id: i64, trade: &ReconstructedTrade) -> Result<(), DbErr>
where
    C: ConnectionTrait,
{
    let participants = trade.participants.iter().map(|p| trade_participants::ActiveModel {
        trade_id: Set(trade_id),
        user_address: Set(p.user_address.clone()),
        side: Set(p.side.tag().to_string()),
        start_pos: Set(p.start_pos),
        order_id: Set(p.order_id),
        strategy_id: Set(p.strategy_id),
        client_order_id: Set(p.client_order_id.clone()),
        ..Default::default()
    });
    TradeParticipants::insert_many(participants).exec(db).await?;
    Ok(())
}

/// Insert one trade and its participants, returning the new trade id.
///
/// If the participant insert fails the trade row is deleted again, so a failure never leaves a
/// trade without participants behind.
pub async fn insert_trade<C>(db: &C, trade: &ReconstructedTrade) -> Result<i64, StoreError>
where
    C: ConnectionTrait,
{
    let time = validate(trade)?;
    let id = insert_trade_row(db, trade, time).await?;

    if let Err(e) = insert_participants(db, id, trade).await {
        tracing::warn!(trade_id = id, error = %e, "Participant insert failed, deleting trade");
        if let Err(cleanup) = Trades::delete_by_id(id).exec(db).await {
            tracing::error!(trade_id = id, error = %cleanup, "Failed to delete trade after participant failure");
        }
        return Err(e.into());
    }

    Ok(id)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct InsertSummary {
    pub inserted: u64,
    pub first_id: Option<i64>,
    pub last_id: Option<i64>,
}

/// Insert a batch inside `txn`, stopping at the first failure.
///
/// On `Err` the caller rolls the transaction back, so a batch lands whole or not at all and
/// can simply be retried.
pub async fn insert_batch(txn: &DatabaseTransaction, trades: &[ReconstructedTrade]) -> Result<InsertSummary, StoreError> {
    let mut summary = InsertSummary::default();
    for trade in trades {
        let time = validate(trade)?;
        let id = insert_trade_row(txn, trade, time).await?;
        insert_participants(txn, id, trade).await?;
        summary.inserted += 1;
        summary.first_id.get_or_insert(id);
        summary.last_id = Some(id);
    }
    Ok(summary)
}
