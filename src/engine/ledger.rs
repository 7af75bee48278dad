//! Position ledger: one row per (instrument, account) holding.
//!
//! Each row carries two kinds of field. The share balance is a snapshot
//! from the event and only the newest event in chain order may set it; the
//! deposited/redeemed totals are order-insensitive accumulators that every
//! event adds to, stale or not. Deposits credit the receiving account,
//! redemptions debit the sending one, and amounts are net of fees.

use ethers_core::types::U256;
use tracing::debug;

use crate::events::{EventMeta, ShareFlow};
use crate::store::models::{CurveKey, PositionCf, PositionKey, PositionRow};
use crate::store::WriteTxn;

use super::{Change, EngineError, Propagation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FlowDirection {
    Deposit,
    Redeem,
}

pub(crate) fn apply_flow(
    txn: &mut WriteTxn<'_>,
    prop: &mut Propagation,
    meta: &EventMeta,
    direction: FlowDirection,
    flow: &ShareFlow,
) -> Result<(), EngineError> {
    let account = match direction {
        FlowDirection::Deposit => flow.receiver,
        FlowDirection::Redeem => flow.sender,
    };
    let key = PositionKey::new(flow.term_id, flow.curve_id, account);
    let amount = flow.assets_after_fees;

    let existing = txn.get::<PositionCf>(&key)?;
    let stored_watermark = existing.as_ref().map(|row| row.watermark);

    let mut row = existing.unwrap_or(PositionRow {
        account,
        term_id: flow.term_id,
        curve_id: flow.curve_id,
        shares: U256::zero(),
        deposited: U256::zero(),
        redeemed: U256::zero(),
        watermark: meta.order,
    });

    match direction {
        FlowDirection::Deposit => row.deposited = row.deposited.saturating_add(amount),
        FlowDirection::Redeem => row.redeemed = row.redeemed.saturating_add(amount),
    }

    if meta.order.supersedes(stored_watermark) {
        row.shares = flow.share_balance;
        row.watermark = meta.order;
    } else {
        debug!(
            "Stale balance for {} curve {} at {}; accumulators updated only",
            flow.term_id.short(),
            flow.curve_id,
            meta.order
        );
    }

    txn.put::<PositionCf>(&key, &row)?;
    prop.push(Change::Position(CurveKey::new(flow.term_id, flow.curve_id)));
    Ok(())
}
