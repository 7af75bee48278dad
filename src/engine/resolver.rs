//! Identity resolver: entity and relationship base relations.
//!
//! Creation events are last-writer-wins on the chain order key. A
//! relationship's opposing-instrument id is derived exactly once, the first
//! time the relationship is seen, and survives any later refresh of its
//! subject, predicate and object.

use tracing::debug;

use crate::events::{EntityCreated, EventMeta, RelationshipCreated};
use crate::externals::{OpposingIdDeriver, PayloadDecoder};
use crate::identity::TermId;
use crate::store::models::{
    EntityClass, EntityCf, EntityRow, PairKey, RelationshipCf, RelationshipRow,
    RelationshipsByInstrumentCf, RelationshipsByPredicateObjectCf,
    RelationshipsBySubjectPredicateCf, ResolutionStatus,
};
use crate::store::table::TypedCf;
use crate::store::{DbContextError, WriteTxn};

use super::{AnalyticsKey, Change, EngineError, Propagation};

pub(crate) fn apply_entity(
    txn: &mut WriteTxn<'_>,
    meta: &EventMeta,
    payload: &EntityCreated,
    decoder: &dyn PayloadDecoder,
) -> Result<(), EngineError> {
    if let Some(existing) = txn.get::<EntityCf>(&payload.term_id)? {
        if !meta.order.supersedes(Some(existing.watermark)) {
            debug!(
                "Stale entity creation for {} at {} ignored",
                payload.term_id.short(),
                meta.order
            );
            return Ok(());
        }
    }

    let decoded = decoder.decode_text(&payload.data);
    let (class, resolution) = classify_payload(&payload.data, decoded.as_deref());

    let row = EntityRow {
        term_id: payload.term_id,
        creator: payload.creator,
        wallet: payload.wallet,
        data: payload.data.clone(),
        decoded,
        class,
        resolution,
        created_at: meta.timestamp,
        watermark: meta.order,
    };
    txn.put::<EntityCf>(&payload.term_id, &row)?;
    debug!(
        "Entity {} stored as {} ({})",
        payload.term_id.short(),
        row.class,
        row.resolution
    );
    Ok(())
}

pub(crate) fn apply_relationship(
    txn: &mut WriteTxn<'_>,
    prop: &mut Propagation,
    meta: &EventMeta,
    payload: &RelationshipCreated,
    deriver: &dyn OpposingIdDeriver,
) -> Result<(), EngineError> {
    match txn.get::<RelationshipCf>(&payload.term_id)? {
        None => {
            let opposing_id = deriver.derive(&payload.term_id);
            let row = RelationshipRow {
                term_id: payload.term_id,
                creator: payload.creator,
                subject_id: payload.subject_id,
                predicate_id: payload.predicate_id,
                object_id: payload.object_id,
                opposing_id,
                created_at: meta.timestamp,
                watermark: meta.order,
            };
            txn.put::<RelationshipCf>(&payload.term_id, &row)?;

            index_insert::<RelationshipsByInstrumentCf>(txn, &payload.term_id, payload.term_id)?;
            index_insert::<RelationshipsByInstrumentCf>(txn, &opposing_id, payload.term_id)?;
            let po = PairKey::new(row.predicate_id, row.object_id);
            let sp = PairKey::new(row.subject_id, row.predicate_id);
            index_insert::<RelationshipsByPredicateObjectCf>(txn, &po, payload.term_id)?;
            index_insert::<RelationshipsBySubjectPredicateCf>(txn, &sp, payload.term_id)?;

            prop.push(Change::Relationship(payload.term_id));
            prop.mark_analytics(AnalyticsKey::PredicateObject(po));
            prop.mark_analytics(AnalyticsKey::SubjectPredicate(sp));
            debug!(
                "Relationship {} created, opposing instrument {}",
                payload.term_id.short(),
                opposing_id.short()
            );
        }
        Some(existing) if meta.order.supersedes(Some(existing.watermark)) => {
            let row = RelationshipRow {
                term_id: payload.term_id,
                creator: payload.creator,
                subject_id: payload.subject_id,
                predicate_id: payload.predicate_id,
                object_id: payload.object_id,
                opposing_id: existing.opposing_id,
                created_at: meta.timestamp,
                watermark: meta.order,
            };

            let old_po = PairKey::new(existing.predicate_id, existing.object_id);
            let old_sp = PairKey::new(existing.subject_id, existing.predicate_id);
            let new_po = PairKey::new(row.predicate_id, row.object_id);
            let new_sp = PairKey::new(row.subject_id, row.predicate_id);

            if old_po != new_po {
                index_remove::<RelationshipsByPredicateObjectCf>(txn, &old_po, payload.term_id)?;
                index_insert::<RelationshipsByPredicateObjectCf>(txn, &new_po, payload.term_id)?;
                prop.mark_analytics(AnalyticsKey::PredicateObject(old_po));
                prop.mark_analytics(AnalyticsKey::PredicateObject(new_po));
            }
            if old_sp != new_sp {
                index_remove::<RelationshipsBySubjectPredicateCf>(txn, &old_sp, payload.term_id)?;
                index_insert::<RelationshipsBySubjectPredicateCf>(txn, &new_sp, payload.term_id)?;
                prop.mark_analytics(AnalyticsKey::SubjectPredicate(old_sp));
                prop.mark_analytics(AnalyticsKey::SubjectPredicate(new_sp));
            }

            txn.put::<RelationshipCf>(&payload.term_id, &row)?;
            debug!(
                "Relationship {} refreshed by newer creation at {}",
                payload.term_id.short(),
                meta.order
            );
        }
        Some(_) => {
            debug!(
                "Stale relationship creation for {} at {} ignored",
                payload.term_id.short(),
                meta.order
            );
        }
    }
    Ok(())
}

fn index_insert<CF>(
    txn: &mut WriteTxn<'_>,
    key: &CF::Key,
    id: TermId,
) -> Result<(), DbContextError>
where
    CF: TypedCf<Value = Vec<TermId>>,
{
    let mut ids = txn.get::<CF>(key)?.unwrap_or_default();
    if !ids.contains(&id) {
        ids.push(id);
        txn.put::<CF>(key, &ids)?;
    }
    Ok(())
}

fn index_remove<CF>(
    txn: &mut WriteTxn<'_>,
    key: &CF::Key,
    id: TermId,
) -> Result<(), DbContextError>
where
    CF: TypedCf<Value = Vec<TermId>>,
{
    if let Some(mut ids) = txn.get::<CF>(key)? {
        ids.retain(|existing| *existing != id);
        if ids.is_empty() {
            txn.delete::<CF>(key)?;
        } else {
            txn.put::<CF>(key, &ids)?;
        }
    }
    Ok(())
}

fn classify_payload(data: &[u8], decoded: Option<&str>) -> (EntityClass, ResolutionStatus) {
    if data.is_empty() {
        return (EntityClass::Unknown, ResolutionStatus::Failed);
    }
    match decoded {
        Some(text) => (classify_text(text), ResolutionStatus::Resolved),
        None => (EntityClass::Unknown, ResolutionStatus::Pending),
    }
}

fn classify_text(text: &str) -> EntityClass {
    let trimmed = text.trim();
    if is_account_literal(trimmed) {
        EntityClass::Account
    } else if is_json_literal(trimmed) {
        EntityClass::Json
    } else if is_uri_literal(trimmed) {
        EntityClass::Uri
    } else {
        EntityClass::Text
    }
}

fn is_account_literal(text: &str) -> bool {
    let Some(digits) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) else {
        return false;
    };
    digits.len() == 40 && digits.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_json_literal(text: &str) -> bool {
    (text.starts_with('{') || text.starts_with('['))
        && serde_json::from_str::<serde_json::Value>(text).is_ok()
}

fn is_uri_literal(text: &str) -> bool {
    let Some((scheme, rest)) = text.split_once("://") else {
        return false;
    };
    !rest.is_empty()
        && scheme.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testkit::*;
    use crate::events::OrderKey;

    #[test]
    fn test_classifies_account_addresses() {
        assert_eq!(
            classify_text("0xdeadbeef00000000000000000000000000000001"),
            EntityClass::Account
        );
        assert_eq!(classify_text("0xdeadbeef"), EntityClass::Text);
    }

    #[test]
    fn test_classifies_json_documents() {
        assert_eq!(classify_text(r#"{"name":"alice"}"#), EntityClass::Json);
        assert_eq!(classify_text("[1,2,3]"), EntityClass::Json);
        assert_eq!(classify_text("{not json"), EntityClass::Text);
    }

    #[test]
    fn test_classifies_uris() {
        assert_eq!(classify_text("https://example.com/doc"), EntityClass::Uri);
        assert_eq!(classify_text("ipfs://QmYwAPJzv5CZsnA6"), EntityClass::Uri);
        assert_eq!(classify_text("://missing-scheme"), EntityClass::Text);
        assert_eq!(classify_text("plain words"), EntityClass::Text);
    }

    #[test]
    fn test_empty_payload_fails_resolution() {
        assert_eq!(
            classify_payload(b"", None),
            (EntityClass::Unknown, ResolutionStatus::Failed)
        );
    }

    #[test]
    fn test_undecodable_payload_stays_pending() {
        assert_eq!(
            classify_payload(&[0xff, 0x00], None),
            (EntityClass::Unknown, ResolutionStatus::Pending)
        );
    }

    #[test]
    fn test_newer_entity_creation_replaces_older() {
        let (mut eng, _tmp) = temp_engine();
        let t = term(0x91);

        eng.process(&entity(meta(10, 0), t, b"first words")).unwrap();
        eng.process(&entity(meta(12, 0), t, b"https://example.com/x"))
            .unwrap();
        // late replay of an event between the two stays ignored
        eng.process(&entity(meta(11, 0), t, b"middle words")).unwrap();

        let row = eng.store().get::<EntityCf>(&t).unwrap().unwrap();
        assert_eq!(row.decoded.as_deref(), Some("https://example.com/x"));
        assert_eq!(row.class, EntityClass::Uri);
        assert_eq!(row.watermark, OrderKey::new(12, 0));
    }

    #[test]
    fn test_opposing_id_fixed_at_first_sight() {
        let (mut eng, _tmp) = temp_engine();
        let r = term(0x9A);

        eng.process(&relationship(meta(10, 0), r, term(1), term(2), term(3)))
            .unwrap();
        let first = eng.store().get::<RelationshipCf>(&r).unwrap().unwrap();

        eng.process(&relationship(meta(11, 0), r, term(4), term(2), term(3)))
            .unwrap();
        let second = eng.store().get::<RelationshipCf>(&r).unwrap().unwrap();

        assert_eq!(second.opposing_id, first.opposing_id);
        assert_eq!(second.subject_id, term(4));
        assert_eq!(second.watermark, OrderKey::new(11, 0));
    }

    #[test]
    fn test_relationship_before_its_entities() {
        let (mut eng, _tmp) = temp_engine();
        let r = term(0x9A);

        // the relationship references entities the feed has not delivered yet
        eng.process(&relationship(meta(10, 0), r, term(1), term(2), term(3)))
            .unwrap();
        assert!(eng.store().get::<RelationshipCf>(&r).unwrap().is_some());
        assert!(eng.store().get::<EntityCf>(&term(1)).unwrap().is_none());

        eng.process(&entity(meta(11, 0), term(1), b"subject")).unwrap();
        assert!(eng.store().get::<EntityCf>(&term(1)).unwrap().is_some());
    }
}
