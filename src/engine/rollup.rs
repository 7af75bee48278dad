//! Cross-curve rollups: one row per term, summed over all curves.
//!
//! The term rollup sums a term's instrument rows; the pair rollup sums a
//! relationship's pair summaries, so it covers both sides. Both are
//! recomputed whole from a prefix scan. The rollup kind is taken from the
//! first instrument with a known classification, in ascending curve order.

use ethers_core::types::U256;

use crate::events::InstrumentKind;
use crate::identity::TermId;
use crate::store::models::{
    CurveKey, InstrumentCf, PairSummaryCf, PairTermRollupCf, PairTermRollupRow, TermKind,
    TermRollupCf, TermRollupRow,
};
use crate::store::WriteTxn;

use super::EngineError;

pub(crate) fn recompute_term(txn: &mut WriteTxn<'_>, term_id: TermId) -> Result<(), EngineError> {
    let prefix = CurveKey::term_prefix(&term_id);
    let instruments = txn.scan_prefix::<InstrumentCf>(&prefix)?;
    if instruments.is_empty() {
        return Ok(());
    }

    let mut row = TermRollupRow {
        term_id,
        total_assets: U256::zero(),
        market_cap: U256::zero(),
        participants: 0,
        kind: TermKind::Unknown,
    };
    for (_, instrument) in &instruments {
        row.total_assets = row.total_assets.saturating_add(instrument.total_assets);
        row.market_cap = row.market_cap.saturating_add(instrument.market_cap);
        row.participants += instrument.participants;
        if row.kind == TermKind::Unknown && instrument.kind != InstrumentKind::Unknown {
            row.kind = TermKind::from(instrument.kind);
        }
    }

    txn.put::<TermRollupCf>(&term_id, &row)?;
    Ok(())
}

pub(crate) fn recompute_pair_term(
    txn: &mut WriteTxn<'_>,
    relationship: TermId,
) -> Result<(), EngineError> {
    let prefix = CurveKey::term_prefix(&relationship);
    let summaries = txn.scan_prefix::<PairSummaryCf>(&prefix)?;
    if summaries.is_empty() {
        return Ok(());
    }

    let mut row = PairTermRollupRow {
        term_id: relationship,
        total_assets: U256::zero(),
        market_cap: U256::zero(),
        participants: 0,
    };
    for (_, summary) in &summaries {
        row.total_assets = row.total_assets.saturating_add(summary.total_assets);
        row.market_cap = row.market_cap.saturating_add(summary.market_cap);
        row.participants += summary.participants;
    }

    txn.put::<PairTermRollupCf>(&relationship, &row)?;
    Ok(())
}
