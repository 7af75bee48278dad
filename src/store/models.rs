//! Row and key types for every materialized relation.
//!
//! Rows are plain serde structs stored as JSON. Keys are composite
//! big-endian encodings (see [`OrderedKey`]) laid out so that the scans the
//! engine depends on are prefix scans: positions under an instrument,
//! instruments under a term, pair summaries under a relationship.

use std::fmt;

use chrono::{DateTime, Utc};
use ethers_core::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::define_typed_cf;
use crate::events::{InstrumentKind, OrderKey};
use crate::identity::TermId;
use crate::store::codec::{CodecError, OrderedKey};
use crate::store::table::TypedCf;

/// Outcome of decoding an entity's payload bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    Pending,
    Resolved,
    Failed,
}

impl fmt::Display for ResolutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ResolutionStatus::Pending => "pending",
            ResolutionStatus::Resolved => "resolved",
            ResolutionStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Broad shape of a resolved entity payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityClass {
    #[default]
    Unknown,
    Account,
    Json,
    Uri,
    Text,
}

impl fmt::Display for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EntityClass::Unknown => "unknown",
            EntityClass::Account => "account",
            EntityClass::Json => "json",
            EntityClass::Uri => "uri",
            EntityClass::Text => "text",
        };
        f.write_str(label)
    }
}

/// What a rolled-up term turned out to be, judged by its instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermKind {
    #[default]
    Unknown,
    Entity,
    Relationship,
}

impl fmt::Display for TermKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TermKind::Unknown => "unknown",
            TermKind::Entity => "entity",
            TermKind::Relationship => "relationship",
        };
        f.write_str(label)
    }
}

impl From<InstrumentKind> for TermKind {
    fn from(kind: InstrumentKind) -> Self {
        match kind {
            InstrumentKind::Unknown => TermKind::Unknown,
            InstrumentKind::Entity => TermKind::Entity,
            InstrumentKind::Affirming | InstrumentKind::Opposing => TermKind::Relationship,
        }
    }
}

// Composite keys

/// Key of one instrument: a term and one of its bonding curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CurveKey {
    pub term_id: TermId,
    pub curve_id: u64,
}

impl CurveKey {
    pub fn new(term_id: TermId, curve_id: u64) -> Self {
        Self { term_id, curve_id }
    }

    /// Prefix covering every curve of one term.
    pub fn term_prefix(term_id: &TermId) -> Vec<u8> {
        term_id.to_vec()
    }
}

impl OrderedKey for CurveKey {
    fn encode_key(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(40);
        bytes.extend_from_slice(self.term_id.as_bytes());
        bytes.extend_from_slice(&self.curve_id.to_be_bytes());
        bytes
    }

    fn decode_key(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() != 40 {
            return Err(CodecError::DeserializationError(format!(
                "Expected 40 bytes for CurveKey, got {}",
                data.len()
            )));
        }
        let term_id = TermId::from_slice(&data[..32])
            .map_err(|e| CodecError::DeserializationError(e.to_string()))?;
        let mut curve = [0u8; 8];
        curve.copy_from_slice(&data[32..]);
        Ok(Self {
            term_id,
            curve_id: u64::from_be_bytes(curve),
        })
    }
}

/// Key of one account's position on one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PositionKey {
    pub term_id: TermId,
    pub curve_id: u64,
    pub account: Address,
}

impl PositionKey {
    pub fn new(term_id: TermId, curve_id: u64, account: Address) -> Self {
        Self {
            term_id,
            curve_id,
            account,
        }
    }

    /// Prefix covering every position on one instrument.
    pub fn curve_prefix(term_id: &TermId, curve_id: u64) -> Vec<u8> {
        CurveKey::new(*term_id, curve_id).encode_key()
    }
}

impl OrderedKey for PositionKey {
    fn encode_key(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(60);
        bytes.extend_from_slice(self.term_id.as_bytes());
        bytes.extend_from_slice(&self.curve_id.to_be_bytes());
        bytes.extend_from_slice(self.account.as_bytes());
        bytes
    }

    fn decode_key(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() != 60 {
            return Err(CodecError::DeserializationError(format!(
                "Expected 60 bytes for PositionKey, got {}",
                data.len()
            )));
        }
        let term_id = TermId::from_slice(&data[..32])
            .map_err(|e| CodecError::DeserializationError(e.to_string()))?;
        let mut curve = [0u8; 8];
        curve.copy_from_slice(&data[32..40]);
        Ok(Self {
            term_id,
            curve_id: u64::from_be_bytes(curve),
            account: Address::from_slice(&data[40..]),
        })
    }
}

/// Ordered pair of term ids, used for the relationship analytics keys
/// `(predicate, object)` and `(subject, predicate)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairKey {
    pub first: TermId,
    pub second: TermId,
}

impl PairKey {
    pub fn new(first: TermId, second: TermId) -> Self {
        Self { first, second }
    }
}

impl OrderedKey for PairKey {
    fn encode_key(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(64);
        bytes.extend_from_slice(self.first.as_bytes());
        bytes.extend_from_slice(self.second.as_bytes());
        bytes
    }

    fn decode_key(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() != 64 {
            return Err(CodecError::DeserializationError(format!(
                "Expected 64 bytes for PairKey, got {}",
                data.len()
            )));
        }
        let first = TermId::from_slice(&data[..32])
            .map_err(|e| CodecError::DeserializationError(e.to_string()))?;
        let second = TermId::from_slice(&data[32..])
            .map_err(|e| CodecError::DeserializationError(e.to_string()))?;
        Ok(Self { first, second })
    }
}

// Row types

/// An entity term and the decoded form of its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRow {
    pub term_id: TermId,
    pub creator: Address,
    pub wallet: Address,
    #[serde(with = "crate::identity::hex_bytes")]
    pub data: Vec<u8>,
    pub decoded: Option<String>,
    pub class: EntityClass,
    pub resolution: ResolutionStatus,
    pub created_at: DateTime<Utc>,
    pub watermark: OrderKey,
}

/// A relationship term: subject, predicate, object and the derived
/// opposing-instrument id, fixed at first sight of the relationship.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationshipRow {
    pub term_id: TermId,
    pub creator: Address,
    pub subject_id: TermId,
    pub predicate_id: TermId,
    pub object_id: TermId,
    pub opposing_id: TermId,
    pub created_at: DateTime<Utc>,
    pub watermark: OrderKey,
}

/// One account's holding on one instrument.
///
/// `shares` is the latest balance in chain order, guarded by `watermark`.
/// `deposited` and `redeemed` accumulate net amounts from every deposit and
/// redemption regardless of delivery order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionRow {
    pub account: Address,
    pub term_id: TermId,
    pub curve_id: u64,
    pub shares: U256,
    pub deposited: U256,
    pub redeemed: U256,
    pub watermark: OrderKey,
}

/// Aggregate state of one instrument (term + curve).
///
/// Price fields follow the newest price event in chain order; the
/// watermark is `None` until a price event has been seen. The participant
/// count is recomputed from positions and carries no watermark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentRow {
    pub term_id: TermId,
    pub curve_id: u64,
    pub total_shares: U256,
    pub share_price: U256,
    pub total_assets: U256,
    pub market_cap: U256,
    pub participants: u64,
    pub kind: InstrumentKind,
    pub watermark: Option<OrderKey>,
}

impl InstrumentRow {
    /// Row for an instrument that has seen flows but no price event yet.
    pub fn empty(term_id: TermId, curve_id: u64) -> Self {
        Self {
            term_id,
            curve_id,
            total_shares: U256::zero(),
            share_price: U256::zero(),
            total_assets: U256::zero(),
            market_cap: U256::zero(),
            participants: 0,
            kind: InstrumentKind::Unknown,
            watermark: None,
        }
    }
}

/// Combined affirming + opposing totals for one relationship on one curve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairSummaryRow {
    pub term_id: TermId,
    pub curve_id: u64,
    pub total_shares: U256,
    pub total_assets: U256,
    pub market_cap: U256,
    pub participants: u64,
}

/// Totals for one term across all of its curves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermRollupRow {
    pub term_id: TermId,
    pub total_assets: U256,
    pub market_cap: U256,
    pub participants: u64,
    pub kind: TermKind,
}

/// Totals for one relationship across curves, both sides combined.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairTermRollupRow {
    pub term_id: TermId,
    pub total_assets: U256,
    pub market_cap: U256,
    pub participants: u64,
}

/// Analytics over every relationship sharing a (predicate, object) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredicateObjectRow {
    pub predicate_id: TermId,
    pub object_id: TermId,
    pub relationships: u64,
    pub participants: u64,
    pub market_cap: U256,
}

/// Analytics over every relationship sharing a (subject, predicate) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectPredicateRow {
    pub subject_id: TermId,
    pub predicate_id: TermId,
    pub relationships: u64,
    pub participants: u64,
    pub market_cap: U256,
}

/// Ingest progress counters, updated inside each event's write batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointRow {
    pub events_applied: u64,
    pub duplicates_dropped: u64,
    pub entities_created: u64,
    pub relationships_created: u64,
    pub deposits: u64,
    pub redemptions: u64,
    pub price_changes: u64,
    pub high_order: Option<OrderKey>,
    pub updated_at: DateTime<Utc>,
}

impl CheckpointRow {
    pub fn new() -> Self {
        Self {
            events_applied: 0,
            duplicates_dropped: 0,
            entities_created: 0,
            relationships_created: 0,
            deposits: 0,
            redemptions: 0,
            price_changes: 0,
            high_order: None,
            updated_at: Utc::now(),
        }
    }
}

impl Default for CheckpointRow {
    fn default() -> Self {
        Self::new()
    }
}

// TypedCf implementations for typed RocksDB operations
// These provide the column family definitions for TypedDbContext

define_typed_cf!(EntityCf, TermId, EntityRow, "entities");
define_typed_cf!(RelationshipCf, TermId, RelationshipRow, "relationships");
define_typed_cf!(PositionCf, PositionKey, PositionRow, "positions");
define_typed_cf!(InstrumentCf, CurveKey, InstrumentRow, "instruments");
define_typed_cf!(PairSummaryCf, CurveKey, PairSummaryRow, "pair_summaries");
define_typed_cf!(TermRollupCf, TermId, TermRollupRow, "term_rollups");
define_typed_cf!(PairTermRollupCf, TermId, PairTermRollupRow, "pair_term_rollups");
define_typed_cf!(PredicateObjectCf, PairKey, PredicateObjectRow, "predicate_object_stats");
define_typed_cf!(SubjectPredicateCf, PairKey, SubjectPredicateRow, "subject_predicate_stats");

// Separate indices for fast lookups
define_typed_cf!(
    RelationshipsByInstrumentCf,
    TermId,
    Vec<TermId>,
    "relationships_by_instrument"
); // affirming or opposing id -> [relationship ids]
define_typed_cf!(
    RelationshipsByPredicateObjectCf,
    PairKey,
    Vec<TermId>,
    "relationships_by_predicate_object"
);
define_typed_cf!(
    RelationshipsBySubjectPredicateCf,
    PairKey,
    Vec<TermId>,
    "relationships_by_subject_predicate"
);

// Ingest bookkeeping
define_typed_cf!(ProcessedEventCf, OrderKey, H256, "processed_events");
define_typed_cf!(CheckpointCf, String, CheckpointRow, "checkpoint");

/// Key of the single checkpoint row.
pub const CHECKPOINT_KEY: &str = "ingest";

/// All column family names for database initialization
pub const ALL_COLUMN_FAMILIES: &[&str] = &[
    EntityCf::NAME,
    RelationshipCf::NAME,
    PositionCf::NAME,
    InstrumentCf::NAME,
    PairSummaryCf::NAME,
    TermRollupCf::NAME,
    PairTermRollupCf::NAME,
    PredicateObjectCf::NAME,
    SubjectPredicateCf::NAME,
    RelationshipsByInstrumentCf::NAME,
    RelationshipsByPredicateObjectCf::NAME,
    RelationshipsBySubjectPredicateCf::NAME,
    ProcessedEventCf::NAME,
    CheckpointCf::NAME,
];

#[cfg(test)]
mod tests {
    use super::*;

    fn term(n: u8) -> TermId {
        TermId::new([n; 32])
    }

    #[test]
    fn test_position_key_roundtrips_and_nests_under_curve_prefix() {
        let key = PositionKey::new(term(1), 42, Address::from_low_u64_be(7));
        let encoded = key.encode_key();
        assert_eq!(encoded.len(), 60);
        assert_eq!(PositionKey::decode_key(&encoded).unwrap(), key);

        let prefix = PositionKey::curve_prefix(&term(1), 42);
        assert!(encoded.starts_with(&prefix));

        let other_curve = PositionKey::curve_prefix(&term(1), 43);
        assert!(!encoded.starts_with(&other_curve));
    }

    #[test]
    fn test_curve_keys_group_by_term_then_curve() {
        let keys = [
            CurveKey::new(term(1), 2),
            CurveKey::new(term(1), 300),
            CurveKey::new(term(2), 1),
        ];
        let encoded: Vec<Vec<u8>> = keys.iter().map(|k| k.encode_key()).collect();
        let mut sorted = encoded.clone();
        sorted.sort();
        assert_eq!(encoded, sorted);
        assert!(encoded[0].starts_with(&CurveKey::term_prefix(&term(1))));
        assert!(encoded[1].starts_with(&CurveKey::term_prefix(&term(1))));
        assert!(!encoded[2].starts_with(&CurveKey::term_prefix(&term(1))));
    }

    #[test]
    fn test_pair_key_is_direction_sensitive() {
        let forward = PairKey::new(term(1), term(2));
        let reverse = PairKey::new(term(2), term(1));
        assert_ne!(forward.encode_key(), reverse.encode_key());
        assert_eq!(PairKey::decode_key(&forward.encode_key()).unwrap(), forward);
    }

    #[test]
    fn test_instrument_kind_maps_to_term_kind() {
        assert_eq!(TermKind::from(InstrumentKind::Entity), TermKind::Entity);
        assert_eq!(
            TermKind::from(InstrumentKind::Affirming),
            TermKind::Relationship
        );
        assert_eq!(
            TermKind::from(InstrumentKind::Opposing),
            TermKind::Relationship
        );
        assert_eq!(TermKind::from(InstrumentKind::Unknown), TermKind::Unknown);
    }
}
