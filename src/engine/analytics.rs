//! Relationship analytics: stats per (predicate, object) and per
//! (subject, predicate) pair.
//!
//! Each row counts the relationships sharing the pair and sums the
//! participants and market cap of their pair rollups. Rows are recomputed
//! whole from the membership index; a pair whose membership drops to zero
//! has its row deleted rather than left behind with zeroed counters.

use ethers_core::types::U256;
use tracing::debug;

use crate::identity::TermId;
use crate::store::models::{
    PairKey, PairTermRollupCf, PredicateObjectCf, PredicateObjectRow, RelationshipCf,
    RelationshipsByPredicateObjectCf, RelationshipsBySubjectPredicateCf, SubjectPredicateCf,
    SubjectPredicateRow,
};
use crate::store::WriteTxn;

use super::{AnalyticsKey, EngineError, Propagation};

/// Mark both analytics rows of a relationship for post-drain recomputation.
pub(crate) fn mark_for_relationship(
    txn: &mut WriteTxn<'_>,
    prop: &mut Propagation,
    relationship: TermId,
) -> Result<(), EngineError> {
    let Some(row) = txn.get::<RelationshipCf>(&relationship)? else {
        debug!(
            "Relationship {} missing during analytics marking; skipping",
            relationship.short()
        );
        return Ok(());
    };
    prop.mark_analytics(AnalyticsKey::PredicateObject(PairKey::new(
        row.predicate_id,
        row.object_id,
    )));
    prop.mark_analytics(AnalyticsKey::SubjectPredicate(PairKey::new(
        row.subject_id,
        row.predicate_id,
    )));
    Ok(())
}

pub(crate) fn recompute(txn: &mut WriteTxn<'_>, key: &AnalyticsKey) -> Result<(), EngineError> {
    match key {
        AnalyticsKey::PredicateObject(pair) => {
            let members = txn
                .get::<RelationshipsByPredicateObjectCf>(pair)?
                .unwrap_or_default();
            if members.is_empty() {
                txn.delete::<PredicateObjectCf>(pair)?;
                return Ok(());
            }
            let (participants, market_cap) = sum_rollups(txn, &members)?;
            let row = PredicateObjectRow {
                predicate_id: pair.first,
                object_id: pair.second,
                relationships: members.len() as u64,
                participants,
                market_cap,
            };
            txn.put::<PredicateObjectCf>(pair, &row)?;
        }
        AnalyticsKey::SubjectPredicate(pair) => {
            let members = txn
                .get::<RelationshipsBySubjectPredicateCf>(pair)?
                .unwrap_or_default();
            if members.is_empty() {
                txn.delete::<SubjectPredicateCf>(pair)?;
                return Ok(());
            }
            let (participants, market_cap) = sum_rollups(txn, &members)?;
            let row = SubjectPredicateRow {
                subject_id: pair.first,
                predicate_id: pair.second,
                relationships: members.len() as u64,
                participants,
                market_cap,
            };
            txn.put::<SubjectPredicateCf>(pair, &row)?;
        }
    }
    Ok(())
}

/// Sum participants and market cap over the members' pair rollups.
/// Relationships without flows yet have no rollup row and contribute zero.
fn sum_rollups(
    txn: &WriteTxn<'_>,
    members: &[TermId],
) -> Result<(u64, U256), EngineError> {
    let mut participants = 0u64;
    let mut market_cap = U256::zero();
    for member in members {
        if let Some(rollup) = txn.get::<PairTermRollupCf>(member)? {
            participants += rollup.participants;
            market_cap = market_cap.saturating_add(rollup.market_cap);
        }
    }
    Ok((participants, market_cap))
}

#[cfg(test)]
mod tests {
    use crate::engine::testkit::*;
    use crate::events::InstrumentKind;
    use crate::store::models::{
        PairKey, PredicateObjectCf, RelationshipCf, SubjectPredicateCf,
    };

    #[test]
    fn test_shared_pair_sums_over_relationships() {
        let (mut eng, _tmp) = temp_engine();
        let (s1, s2) = (term(0x81), term(0x82));
        let p = term(0x83);
        let o = term(0x84);
        let (r1, r2) = (term(0x8A), term(0x8B));

        eng.process(&relationship(meta(10, 0), r1, s1, p, o)).unwrap();
        eng.process(&relationship(meta(10, 1), r2, s2, p, o)).unwrap();
        eng.process(&price(meta(11, 0), r1, 1, eth(1), eth(2), eth(2), InstrumentKind::Affirming))
            .unwrap();
        eng.process(&price(meta(11, 1), r2, 1, eth(1), eth(3), eth(3), InstrumentKind::Affirming))
            .unwrap();

        let po = eng
            .store()
            .get::<PredicateObjectCf>(&PairKey::new(p, o))
            .unwrap()
            .unwrap();
        assert_eq!(po.relationships, 2);
        assert_eq!(po.market_cap, eth(5));

        let sp = eng
            .store()
            .get::<SubjectPredicateCf>(&PairKey::new(s1, p))
            .unwrap()
            .unwrap();
        assert_eq!(sp.relationships, 1);
        assert_eq!(sp.market_cap, eth(2));
    }

    #[test]
    fn test_retarget_moves_membership_and_deletes_empty_rows() {
        let (mut eng, _tmp) = temp_engine();
        let s = term(0x81);
        let (p1, p2, p3) = (term(0x83), term(0x84), term(0x85));
        let o = term(0x86);
        let r = term(0x8A);

        eng.process(&relationship(meta(10, 0), r, s, p1, o)).unwrap();
        eng.process(&price(meta(11, 0), r, 1, eth(1), eth(2), eth(2), InstrumentKind::Affirming))
            .unwrap();

        // a newer emission points the relationship at a different predicate
        eng.process(&relationship(meta(12, 0), r, s, p2, o)).unwrap();

        assert!(eng
            .store()
            .get::<PredicateObjectCf>(&PairKey::new(p1, o))
            .unwrap()
            .is_none());
        assert!(eng
            .store()
            .get::<SubjectPredicateCf>(&PairKey::new(s, p1))
            .unwrap()
            .is_none());

        let po = eng
            .store()
            .get::<PredicateObjectCf>(&PairKey::new(p2, o))
            .unwrap()
            .unwrap();
        assert_eq!(po.relationships, 1);
        assert_eq!(po.market_cap, eth(2));

        // a stale emission changes nothing
        eng.process(&relationship(meta(9, 0), r, s, p3, o)).unwrap();
        assert!(eng
            .store()
            .get::<PredicateObjectCf>(&PairKey::new(p3, o))
            .unwrap()
            .is_none());

        // the opposing id survived the retarget unchanged
        let row = eng.store().get::<RelationshipCf>(&r).unwrap().unwrap();
        assert_eq!(row.opposing_id, opposing(r));
        assert_eq!(row.predicate_id, p2);
    }
}
