//! Read-only query surface over the materialized relations.
//!
//! Point lookups address single rows by their natural keys; listing calls
//! are prefix scans; the top-N rankings sort a full scan in memory, which
//! is fine at the table sizes an indexer accumulates.

use std::path::Path;

use ethers_core::types::Address;

use crate::identity::TermId;
use crate::store::models::{
    CheckpointCf, CheckpointRow, CurveKey, EntityCf, EntityRow, InstrumentCf, InstrumentRow,
    PairKey, PairSummaryCf, PairSummaryRow, PairTermRollupCf, PairTermRollupRow, PositionCf,
    PositionKey, PositionRow, PredicateObjectCf, PredicateObjectRow, ProcessedEventCf,
    RelationshipCf, RelationshipRow, RelationshipsByPredicateObjectCf,
    RelationshipsBySubjectPredicateCf, SubjectPredicateCf, SubjectPredicateRow, TermRollupCf,
    TermRollupRow, ALL_COLUMN_FAMILIES, CHECKPOINT_KEY,
};
use crate::store::{DbContextError, TypedDbContext};

/// Row counts per relation, for the stats command.
#[derive(Debug, Clone, Copy)]
pub struct TableCounts {
    pub entities: u64,
    pub relationships: u64,
    pub positions: u64,
    pub instruments: u64,
    pub pair_summaries: u64,
    pub term_rollups: u64,
    pub pair_term_rollups: u64,
    pub predicate_object_stats: u64,
    pub subject_predicate_stats: u64,
    pub processed_events: u64,
}

/// Read-only access to a materialized database.
pub struct QueryService {
    store: TypedDbContext,
}

impl QueryService {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DbContextError> {
        Ok(Self {
            store: TypedDbContext::open(path, ALL_COLUMN_FAMILIES.to_vec())?,
        })
    }

    pub fn new(store: TypedDbContext) -> Self {
        Self { store }
    }

    pub fn entity(&self, term_id: &TermId) -> Result<Option<EntityRow>, DbContextError> {
        self.store.get::<EntityCf>(term_id)
    }

    pub fn relationship(
        &self,
        term_id: &TermId,
    ) -> Result<Option<RelationshipRow>, DbContextError> {
        self.store.get::<RelationshipCf>(term_id)
    }

    pub fn instrument(
        &self,
        term_id: &TermId,
        curve_id: u64,
    ) -> Result<Option<InstrumentRow>, DbContextError> {
        self.store.get::<InstrumentCf>(&CurveKey::new(*term_id, curve_id))
    }

    /// Every curve of one term, in ascending curve order.
    pub fn instruments_of(&self, term_id: &TermId) -> Result<Vec<InstrumentRow>, DbContextError> {
        let rows = self
            .store
            .scan_prefix::<InstrumentCf>(&CurveKey::term_prefix(term_id))?;
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    pub fn position(
        &self,
        term_id: &TermId,
        curve_id: u64,
        account: &Address,
    ) -> Result<Option<PositionRow>, DbContextError> {
        self.store
            .get::<PositionCf>(&PositionKey::new(*term_id, curve_id, *account))
    }

    /// Every position on one instrument.
    pub fn positions_on(
        &self,
        term_id: &TermId,
        curve_id: u64,
    ) -> Result<Vec<PositionRow>, DbContextError> {
        let rows = self
            .store
            .scan_prefix::<PositionCf>(&PositionKey::curve_prefix(term_id, curve_id))?;
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }

    pub fn pair_summary(
        &self,
        relationship: &TermId,
        curve_id: u64,
    ) -> Result<Option<PairSummaryRow>, DbContextError> {
        self.store
            .get::<PairSummaryCf>(&CurveKey::new(*relationship, curve_id))
    }

    pub fn term_rollup(&self, term_id: &TermId) -> Result<Option<TermRollupRow>, DbContextError> {
        self.store.get::<TermRollupCf>(term_id)
    }

    pub fn pair_term_rollup(
        &self,
        relationship: &TermId,
    ) -> Result<Option<PairTermRollupRow>, DbContextError> {
        self.store.get::<PairTermRollupCf>(relationship)
    }

    pub fn predicate_object(
        &self,
        predicate: &TermId,
        object: &TermId,
    ) -> Result<Option<PredicateObjectRow>, DbContextError> {
        self.store
            .get::<PredicateObjectCf>(&PairKey::new(*predicate, *object))
    }

    pub fn subject_predicate(
        &self,
        subject: &TermId,
        predicate: &TermId,
    ) -> Result<Option<SubjectPredicateRow>, DbContextError> {
        self.store
            .get::<SubjectPredicateCf>(&PairKey::new(*subject, *predicate))
    }

    /// Relationship ids sharing a (predicate, object) pair.
    pub fn relationships_with_predicate_object(
        &self,
        predicate: &TermId,
        object: &TermId,
    ) -> Result<Vec<TermId>, DbContextError> {
        Ok(self
            .store
            .get::<RelationshipsByPredicateObjectCf>(&PairKey::new(*predicate, *object))?
            .unwrap_or_default())
    }

    /// Relationship ids sharing a (subject, predicate) pair.
    pub fn relationships_with_subject_predicate(
        &self,
        subject: &TermId,
        predicate: &TermId,
    ) -> Result<Vec<TermId>, DbContextError> {
        Ok(self
            .store
            .get::<RelationshipsBySubjectPredicateCf>(&PairKey::new(*subject, *predicate))?
            .unwrap_or_default())
    }

    /// Term rollups ranked by market cap, descending. Ties break on term id
    /// so the ranking is stable.
    pub fn top_term_rollups(&self, limit: usize) -> Result<Vec<TermRollupRow>, DbContextError> {
        let mut rows: Vec<TermRollupRow> = self
            .store
            .scan::<TermRollupCf>()?
            .into_iter()
            .map(|(_, row)| row)
            .collect();
        rows.sort_by(|a, b| {
            b.market_cap
                .cmp(&a.market_cap)
                .then(a.term_id.cmp(&b.term_id))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    /// Instruments ranked by market cap, descending.
    pub fn top_instruments(&self, limit: usize) -> Result<Vec<InstrumentRow>, DbContextError> {
        let mut rows: Vec<InstrumentRow> = self
            .store
            .scan::<InstrumentCf>()?
            .into_iter()
            .map(|(_, row)| row)
            .collect();
        rows.sort_by(|a, b| {
            b.market_cap
                .cmp(&a.market_cap)
                .then(a.term_id.cmp(&b.term_id).then(a.curve_id.cmp(&b.curve_id)))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    pub fn checkpoint(&self) -> Result<CheckpointRow, DbContextError> {
        Ok(self
            .store
            .get::<CheckpointCf>(&CHECKPOINT_KEY.to_string())?
            .unwrap_or_default())
    }

    pub fn table_counts(&self) -> Result<TableCounts, DbContextError> {
        Ok(TableCounts {
            entities: self.store.count::<EntityCf>()?,
            relationships: self.store.count::<RelationshipCf>()?,
            positions: self.store.count::<PositionCf>()?,
            instruments: self.store.count::<InstrumentCf>()?,
            pair_summaries: self.store.count::<PairSummaryCf>()?,
            term_rollups: self.store.count::<TermRollupCf>()?,
            pair_term_rollups: self.store.count::<PairTermRollupCf>()?,
            predicate_object_stats: self.store.count::<PredicateObjectCf>()?,
            subject_predicate_stats: self.store.count::<SubjectPredicateCf>()?,
            processed_events: self.store.count::<ProcessedEventCf>()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testkit::*;
    use crate::events::InstrumentKind;

    #[test]
    fn test_top_term_rollups_rank_and_break_ties() {
        let (mut eng, _tmp) = temp_engine();

        // caps: term 1 -> 30, terms 2 and 3 -> 20 each
        eng.process(&price(meta(10, 0), term(1), 1, eth(1), eth(1), eth(30), InstrumentKind::Entity))
            .unwrap();
        eng.process(&price(meta(10, 1), term(3), 1, eth(1), eth(1), eth(20), InstrumentKind::Entity))
            .unwrap();
        eng.process(&price(meta(10, 2), term(2), 1, eth(1), eth(1), eth(20), InstrumentKind::Entity))
            .unwrap();

        let service = QueryService::new(eng.store().clone());
        let top = service.top_term_rollups(10).unwrap();
        let ids: Vec<TermId> = top.iter().map(|row| row.term_id).collect();
        assert_eq!(ids, vec![term(1), term(2), term(3)]);

        let top = service.top_term_rollups(2).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].market_cap, eth(30));
    }

    #[test]
    fn test_top_instruments_order_within_a_term() {
        let (mut eng, _tmp) = temp_engine();
        let t = term(5);

        eng.process(&price(meta(10, 0), t, 2, eth(1), eth(1), eth(10), InstrumentKind::Entity))
            .unwrap();
        eng.process(&price(meta(10, 1), t, 1, eth(1), eth(1), eth(10), InstrumentKind::Entity))
            .unwrap();

        let service = QueryService::new(eng.store().clone());
        let top = service.top_instruments(10).unwrap();
        assert_eq!(top.len(), 2);
        // equal caps fall back to curve order
        assert_eq!(top[0].curve_id, 1);
        assert_eq!(top[1].curve_id, 2);
    }

    #[test]
    fn test_table_counts_and_checkpoint() {
        let (mut eng, _tmp) = temp_engine();
        let (s, p, o) = (term(1), term(2), term(3));
        let r = term(0xA0);

        eng.process(&entity(meta(10, 0), s, b"subject")).unwrap();
        eng.process(&relationship(meta(10, 1), r, s, p, o)).unwrap();
        eng.process(&deposit(meta(10, 2), addr(0xA1), r, 1, eth(1), eth(1)))
            .unwrap();

        let service = QueryService::new(eng.store().clone());
        let counts = service.table_counts().unwrap();
        assert_eq!(counts.entities, 1);
        assert_eq!(counts.relationships, 1);
        assert_eq!(counts.positions, 1);
        assert_eq!(counts.processed_events, 3);

        let checkpoint = service.checkpoint().unwrap();
        assert_eq!(checkpoint.events_applied, 3);
        assert_eq!(checkpoint.deposits, 1);
        assert_eq!(checkpoint.high_order, Some(crate::events::OrderKey::new(10, 2)));

        assert_eq!(
            service.relationships_with_predicate_object(&p, &o).unwrap(),
            vec![r]
        );
    }

    #[test]
    fn test_checkpoint_defaults_to_zeroes_on_fresh_db() {
        let (eng, _tmp) = temp_engine();
        let service = QueryService::new(eng.store().clone());
        let checkpoint = service.checkpoint().unwrap();
        assert_eq!(checkpoint.events_applied, 0);
        assert!(checkpoint.high_order.is_none());
    }
}
