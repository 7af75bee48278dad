//! Paired-instrument aggregation: affirming + opposing sides combined.
//!
//! Every relationship owns exactly two instrument ids per curve: its own
//! term id (affirming) and the derived opposing id. A pair summary is
//! always recomputed from scratch over those two rows; a side with no
//! instrument row yet simply contributes zeros. Fan-out walks the
//! instrument index so an instrument update reaches every relationship
//! whose pair it belongs to.

use std::collections::BTreeSet;

use ethers_core::types::U256;
use tracing::debug;

use crate::identity::TermId;
use crate::store::models::{
    CurveKey, InstrumentCf, InstrumentRow, PairSummaryCf, PairSummaryRow, RelationshipCf,
    RelationshipsByInstrumentCf,
};
use crate::store::WriteTxn;

use super::{Change, EngineError, Propagation};

/// Schedule pair-summary recomputation for every relationship whose
/// affirming or opposing side is this instrument.
pub(crate) fn fan_out_instrument(
    txn: &mut WriteTxn<'_>,
    prop: &mut Propagation,
    key: CurveKey,
) -> Result<(), EngineError> {
    let relationships = txn
        .get::<RelationshipsByInstrumentCf>(&key.term_id)?
        .unwrap_or_default();
    for relationship in relationships {
        prop.push(Change::PairSummary {
            relationship,
            curve_id: key.curve_id,
        });
    }
    Ok(())
}

/// Schedule pair summaries for a newly created relationship, one per curve
/// on which either side already has an instrument row.
pub(crate) fn fan_out_relationship(
    txn: &mut WriteTxn<'_>,
    prop: &mut Propagation,
    relationship: TermId,
) -> Result<(), EngineError> {
    let Some(row) = txn.get::<RelationshipCf>(&relationship)? else {
        debug!(
            "Relationship {} missing during fan-out; skipping",
            relationship.short()
        );
        return Ok(());
    };

    let mut curves = BTreeSet::new();
    for side in [row.term_id, row.opposing_id] {
        let prefix = CurveKey::term_prefix(&side);
        for (key, _) in txn.scan_prefix::<InstrumentCf>(&prefix)? {
            curves.insert(key.curve_id);
        }
    }

    for curve_id in curves {
        prop.push(Change::PairSummary {
            relationship,
            curve_id,
        });
    }
    Ok(())
}

pub(crate) fn recompute_summary(
    txn: &mut WriteTxn<'_>,
    prop: &mut Propagation,
    relationship: TermId,
    curve_id: u64,
) -> Result<(), EngineError> {
    let Some(row) = txn.get::<RelationshipCf>(&relationship)? else {
        debug!(
            "Relationship {} missing during pair recompute; skipping",
            relationship.short()
        );
        return Ok(());
    };

    let affirming = txn.get::<InstrumentCf>(&CurveKey::new(row.term_id, curve_id))?;
    let opposing = txn.get::<InstrumentCf>(&CurveKey::new(row.opposing_id, curve_id))?;

    let mut summary = PairSummaryRow {
        term_id: relationship,
        curve_id,
        total_shares: U256::zero(),
        total_assets: U256::zero(),
        market_cap: U256::zero(),
        participants: 0,
    };
    for side in [affirming, opposing].into_iter().flatten() {
        accumulate(&mut summary, &side);
    }

    txn.put::<PairSummaryCf>(&CurveKey::new(relationship, curve_id), &summary)?;
    prop.push(Change::PairTermRollup(relationship));
    Ok(())
}

fn accumulate(summary: &mut PairSummaryRow, side: &InstrumentRow) {
    summary.total_shares = summary.total_shares.saturating_add(side.total_shares);
    summary.total_assets = summary.total_assets.saturating_add(side.total_assets);
    summary.market_cap = summary.market_cap.saturating_add(side.market_cap);
    summary.participants += side.participants;
}
