//! Term identifiers and hex normalization shared by every layer.
//!
//! Every node in the graph, whether it is an entity, a relationship or a
//! derived opposing instrument, is addressed by a 32-byte [`TermId`]. The
//! helpers here are the single place where textual hex forms are parsed
//! and rendered so the rest of the crate never has to care about `0x`
//! prefixes or mixed case.

use std::fmt;
use std::str::FromStr;

use ethers_core::types::Address;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Errors produced when parsing identifiers or hex payloads from text.
#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid hex string '{input}': {reason}")]
    InvalidHex { input: String, reason: String },

    #[error("expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

/// 32-byte identifier of a term (entity, relationship or opposing instrument).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TermId([u8; 32]);

impl TermId {
    pub const LEN: usize = 32;

    pub fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self, IdentityError> {
        if bytes.len() != Self::LEN {
            return Err(IdentityError::InvalidLength {
                expected: Self::LEN,
                got: bytes.len(),
            });
        }
        let mut buf = [0u8; 32];
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Abbreviated form for tables and log lines, e.g. `0x1f9a03..c41b`.
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}..{}", &full[..8], &full[full.len() - 4..])
    }
}

impl fmt::Display for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TermId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TermId({self})")
    }
}

impl From<[u8; 32]> for TermId {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl FromStr for TermId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_hex(s)?;
        Self::from_slice(&bytes)
    }
}

impl Serialize for TermId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TermId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TermIdVisitor;

        impl Visitor<'_> for TermIdVisitor {
            type Value = TermId;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a 32-byte hex string")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<TermId, E> {
                TermId::from_str(value).map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(TermIdVisitor)
    }
}

/// Decode a hex string, tolerating an optional `0x` prefix and mixed case.
pub fn decode_hex(input: &str) -> Result<Vec<u8>, IdentityError> {
    let trimmed = input.trim();
    let stripped = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    hex::decode(stripped).map_err(|e| IdentityError::InvalidHex {
        input: trimmed.to_string(),
        reason: e.to_string(),
    })
}

/// Parse an EVM account address from its textual form.
pub fn parse_address(input: &str) -> Result<Address, IdentityError> {
    let bytes = decode_hex(input)?;
    if bytes.len() != 20 {
        return Err(IdentityError::InvalidLength {
            expected: 20,
            got: bytes.len(),
        });
    }
    Ok(Address::from_slice(&bytes))
}

/// Canonical lowercase rendering for account addresses.
pub fn format_address(address: &Address) -> String {
    format!("0x{}", hex::encode(address.as_bytes()))
}

/// Serde adapter storing byte payloads as `0x` hex strings.
pub mod hex_bytes {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::decode_hex(&raw).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_term_id_roundtrips_through_text() {
        let id = TermId::new([0xab; 32]);
        let text = id.to_string();
        assert!(text.starts_with("0x"));
        assert_eq!(text.len(), 66);
        assert_eq!(TermId::from_str(&text).unwrap(), id);
    }

    #[test]
    fn test_term_id_accepts_unprefixed_uppercase() {
        let id = TermId::from_str(&"AB".repeat(32)).unwrap();
        assert_eq!(id, TermId::new([0xab; 32]));
    }

    #[test]
    fn test_term_id_rejects_wrong_length() {
        assert!(matches!(
            TermId::from_str("0x1234"),
            Err(IdentityError::InvalidLength { expected: 32, got: 2 })
        ));
    }

    #[test]
    fn test_short_form_keeps_prefix_and_suffix() {
        let mut bytes = [0u8; 32];
        bytes[0] = 0x1f;
        bytes[31] = 0x9c;
        let short = TermId::new(bytes).short();
        assert!(short.starts_with("0x1f00"));
        assert!(short.ends_with("009c"));
    }

    #[test]
    fn test_address_parsing_normalizes_case() {
        let addr = parse_address("0xDeAdBeEf00000000000000000000000000000001").unwrap();
        assert_eq!(
            format_address(&addr),
            "0xdeadbeef00000000000000000000000000000001"
        );
    }

    #[test]
    fn test_address_parsing_rejects_short_input() {
        assert!(parse_address("0x1234").is_err());
        assert!(parse_address("not hex").is_err());
    }
}
