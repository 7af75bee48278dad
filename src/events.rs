//! Contract event feed: envelope, payload models and parsing.
//!
//! Events arrive as JSON lines, one object per emitted log. Each line has a
//! common envelope (chain position, transaction hash, timestamp, kind tag)
//! and a kind-specific payload that is decoded into one of the typed payload
//! structs below. Delivery order is arbitrary; the chain position in the
//! envelope is the only ordering that matters downstream.

use std::fmt;

use chrono::{DateTime, Utc};
use ethers_core::types::{Address, H256, U256};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;
use tracing::{error, warn};

use crate::identity::TermId;

#[derive(Debug, Error)]
pub enum EventError {
    #[error("Invalid event format: {0}")]
    InvalidFormat(String),

    #[error("Unknown event kind: {0}")]
    UnknownEventType(String),
}

/// Position of an event in the chain: block number first, then the index of
/// the log inside that block. The derived ordering is the canonical "newer
/// than" relation used by every last-writer-wins field in the store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct OrderKey {
    pub block_number: u64,
    pub log_index: u64,
}

impl OrderKey {
    pub fn new(block_number: u64, log_index: u64) -> Self {
        Self {
            block_number,
            log_index,
        }
    }

    /// True when this event is strictly newer than the stored watermark.
    /// An absent watermark is superseded by anything; an equal key is not
    /// (replays of the same position must stay no-ops).
    pub fn supersedes(&self, stored: Option<OrderKey>) -> bool {
        stored.is_none_or(|watermark| *self > watermark)
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.block_number, self.log_index)
    }
}

/// Envelope fields shared by every event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventMeta {
    pub order: OrderKey,
    pub tx_hash: H256,
    pub tx_index: u64,
    pub timestamp: DateTime<Utc>,
}

/// An entity term was created on chain, carrying its raw payload bytes.
#[derive(Debug, Clone, Deserialize)]
pub struct EntityCreated {
    pub term_id: TermId,
    pub creator: Address,
    pub wallet: Address,
    #[serde(with = "crate::identity::hex_bytes")]
    pub data: Vec<u8>,
}

/// A relationship term was created, linking three existing term ids.
#[derive(Debug, Clone, Deserialize)]
pub struct RelationshipCreated {
    pub term_id: TermId,
    pub creator: Address,
    pub subject_id: TermId,
    pub predicate_id: TermId,
    pub object_id: TermId,
}

/// Assets moved into or out of an instrument. Used by both deposits and
/// redemptions: `share_balance` is the affected account's resulting balance,
/// `assets_after_fees` is the net amount the accumulators track.
#[derive(Debug, Clone, Deserialize)]
pub struct ShareFlow {
    pub sender: Address,
    pub receiver: Address,
    pub term_id: TermId,
    #[serde(deserialize_with = "deserialize_u64_flexible")]
    pub curve_id: u64,
    #[serde(deserialize_with = "deserialize_u256_flexible")]
    pub assets: U256,
    #[serde(deserialize_with = "deserialize_u256_flexible")]
    pub assets_after_fees: U256,
    #[serde(deserialize_with = "deserialize_u256_flexible")]
    pub share_balance: U256,
}

/// Classification of the instrument a price event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    #[default]
    Unknown,
    Entity,
    Affirming,
    Opposing,
}

impl fmt::Display for InstrumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            InstrumentKind::Unknown => "unknown",
            InstrumentKind::Entity => "entity",
            InstrumentKind::Affirming => "affirming",
            InstrumentKind::Opposing => "opposing",
        };
        f.write_str(label)
    }
}

/// The contract republished an instrument's share price and totals.
#[derive(Debug, Clone, Deserialize)]
pub struct PriceChanged {
    pub term_id: TermId,
    #[serde(deserialize_with = "deserialize_u64_flexible")]
    pub curve_id: u64,
    #[serde(deserialize_with = "deserialize_u256_flexible")]
    pub share_price: U256,
    #[serde(deserialize_with = "deserialize_u256_flexible")]
    pub total_assets: U256,
    #[serde(deserialize_with = "deserialize_u256_flexible")]
    pub total_shares: U256,
    #[serde(default)]
    pub instrument_kind: InstrumentKind,
}

#[derive(Debug, Clone)]
pub enum EventBody {
    EntityCreated(EntityCreated),
    RelationshipCreated(RelationshipCreated),
    Deposited(ShareFlow),
    Redeemed(ShareFlow),
    SharePriceChanged(PriceChanged),
}

/// A fully decoded feed event, ready for the engine.
#[derive(Debug, Clone)]
pub struct ContractEvent {
    pub meta: EventMeta,
    pub body: EventBody,
}

impl ContractEvent {
    pub fn order(&self) -> OrderKey {
        self.meta.order
    }

    pub fn kind_name(&self) -> &'static str {
        match self.body {
            EventBody::EntityCreated(_) => "entity_created",
            EventBody::RelationshipCreated(_) => "relationship_created",
            EventBody::Deposited(_) => "deposited",
            EventBody::Redeemed(_) => "redeemed",
            EventBody::SharePriceChanged(_) => "share_price_changed",
        }
    }
}

/// Raw wire form of one feed line before the payload is decoded.
#[derive(Debug, Deserialize)]
pub struct RawEvent {
    pub block_number: u64,
    pub log_index: u64,
    pub tx_hash: H256,
    #[serde(default)]
    pub tx_index: u64,
    pub timestamp: DateTime<Utc>,
    pub kind: String,
    #[serde(flatten)]
    pub payload: serde_json::Value,
}

/// Parse one JSON line from the feed.
pub fn parse_line(line: &str) -> Result<ContractEvent, EventError> {
    let raw: RawEvent =
        serde_json::from_str(line).map_err(|e| EventError::InvalidFormat(e.to_string()))?;
    parse_raw(raw)
}

/// Decode the kind-specific payload of an already-deserialized envelope.
pub fn parse_raw(raw: RawEvent) -> Result<ContractEvent, EventError> {
    let meta = EventMeta {
        order: OrderKey::new(raw.block_number, raw.log_index),
        tx_hash: raw.tx_hash,
        tx_index: raw.tx_index,
        timestamp: raw.timestamp,
    };

    let body = match raw.kind.as_str() {
        "entity_created" => EventBody::EntityCreated(decode_payload(&raw.kind, raw.payload)?),
        "relationship_created" => {
            EventBody::RelationshipCreated(decode_payload(&raw.kind, raw.payload)?)
        }
        "deposited" => EventBody::Deposited(decode_payload(&raw.kind, raw.payload)?),
        "redeemed" => EventBody::Redeemed(decode_payload(&raw.kind, raw.payload)?),
        "share_price_changed" => {
            EventBody::SharePriceChanged(decode_payload(&raw.kind, raw.payload)?)
        }
        other => {
            warn!("Unknown event kind in feed: {}", other);
            return Err(EventError::UnknownEventType(other.to_string()));
        }
    };

    Ok(ContractEvent { meta, body })
}

fn decode_payload<T: de::DeserializeOwned>(
    kind: &str,
    payload: serde_json::Value,
) -> Result<T, EventError> {
    serde_json::from_value(payload).map_err(|e| {
        error!("Failed to parse {} payload: {}", kind, e);
        EventError::InvalidFormat(format!("{kind}: {e}"))
    })
}

/// Accept 256-bit amounts as decimal strings, `0x` hex strings or plain
/// JSON numbers. Feeds disagree on this, so the boundary is lenient.
fn deserialize_u256_flexible<'de, D>(deserializer: D) -> Result<U256, D::Error>
where
    D: Deserializer<'de>,
{
    struct U256Visitor;

    impl Visitor<'_> for U256Visitor {
        type Value = U256;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a 256-bit integer as string or number")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<U256, E> {
            let trimmed = value.trim();
            if let Some(hex_digits) = trimmed
                .strip_prefix("0x")
                .or_else(|| trimmed.strip_prefix("0X"))
            {
                U256::from_str_radix(hex_digits, 16).map_err(de::Error::custom)
            } else {
                U256::from_dec_str(trimmed).map_err(de::Error::custom)
            }
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<U256, E> {
            Ok(U256::from(value))
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<U256, E> {
            u64::try_from(value)
                .map(U256::from)
                .map_err(|_| de::Error::custom("negative amount"))
        }
    }

    deserializer.deserialize_any(U256Visitor)
}

fn deserialize_u64_flexible<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct U64Visitor;

    impl Visitor<'_> for U64Visitor {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an unsigned integer as string or number")
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
            value.trim().parse().map_err(de::Error::custom)
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
            u64::try_from(value).map_err(de::Error::custom)
        }
    }

    deserializer.deserialize_any(U64Visitor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_key_orders_by_block_then_log() {
        let early = OrderKey::new(10, 5);
        let same_block_later = OrderKey::new(10, 6);
        let later_block = OrderKey::new(11, 0);

        assert!(early < same_block_later);
        assert!(same_block_later < later_block);
        assert!(same_block_later.supersedes(Some(early)));
        assert!(!early.supersedes(Some(same_block_later)));
        assert!(!early.supersedes(Some(early)));
        assert!(early.supersedes(None));
    }

    #[test]
    fn test_parses_entity_created_line() {
        let line = r#"{
            "block_number": 120,
            "log_index": 3,
            "tx_hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "tx_index": 1,
            "timestamp": "2024-05-01T12:00:00Z",
            "kind": "entity_created",
            "term_id": "0x2222222222222222222222222222222222222222222222222222222222222222",
            "creator": "0x3333333333333333333333333333333333333333",
            "wallet": "0x4444444444444444444444444444444444444444",
            "data": "0x68656c6c6f"
        }"#;

        let event = parse_line(line).unwrap();
        assert_eq!(event.order(), OrderKey::new(120, 3));
        assert_eq!(event.kind_name(), "entity_created");
        match event.body {
            EventBody::EntityCreated(payload) => {
                assert_eq!(payload.data, b"hello");
                assert_eq!(payload.term_id, TermId::new([0x22; 32]));
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_parses_deposit_with_mixed_amount_encodings() {
        let line = r#"{
            "block_number": 7,
            "log_index": 0,
            "tx_hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "timestamp": "2024-05-01T12:00:00Z",
            "kind": "deposited",
            "sender": "0x3333333333333333333333333333333333333333",
            "receiver": "0x4444444444444444444444444444444444444444",
            "term_id": "0x2222222222222222222222222222222222222222222222222222222222222222",
            "curve_id": "2",
            "assets": "1000000000000000000",
            "assets_after_fees": "0xde0b6b3a7640000",
            "share_balance": 500
        }"#;

        let event = parse_line(line).unwrap();
        match event.body {
            EventBody::Deposited(flow) => {
                assert_eq!(flow.curve_id, 2);
                assert_eq!(flow.assets, U256::exp10(18));
                assert_eq!(flow.assets_after_fees, U256::exp10(18));
                assert_eq!(flow.share_balance, U256::from(500u64));
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_parses_price_change_and_defaults_instrument_kind() {
        let line = r#"{
            "block_number": 9,
            "log_index": 1,
            "tx_hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "timestamp": "2024-05-01T12:00:00Z",
            "kind": "share_price_changed",
            "term_id": "0x2222222222222222222222222222222222222222222222222222222222222222",
            "curve_id": 1,
            "share_price": "2000000000000000000",
            "total_assets": "10",
            "total_shares": "5"
        }"#;

        let event = parse_line(line).unwrap();
        match event.body {
            EventBody::SharePriceChanged(price) => {
                assert_eq!(price.instrument_kind, InstrumentKind::Unknown);
                assert_eq!(price.share_price, U256::exp10(18) * 2u64);
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_unknown_kind() {
        let line = r#"{
            "block_number": 1,
            "log_index": 0,
            "tx_hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "timestamp": "2024-05-01T12:00:00Z",
            "kind": "governance_vote"
        }"#;

        match parse_line(line) {
            Err(EventError::UnknownEventType(kind)) => assert_eq!(kind, "governance_vote"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_rejects_malformed_payload() {
        let line = r#"{
            "block_number": 1,
            "log_index": 0,
            "tx_hash": "0x1111111111111111111111111111111111111111111111111111111111111111",
            "timestamp": "2024-05-01T12:00:00Z",
            "kind": "relationship_created",
            "term_id": "0x2222222222222222222222222222222222222222222222222222222222222222"
        }"#;

        assert!(matches!(parse_line(line), Err(EventError::InvalidFormat(_))));
    }
}
