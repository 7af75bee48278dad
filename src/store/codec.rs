//! Byte codecs for keys and values stored in RocksDB.
//!
//! Values are serialized as JSON for painless schema evolution and easy
//! debugging with `ldb`. Keys use hand-written big-endian encodings whose
//! byte order matches the logical order, so range and prefix scans walk
//! rows in a meaningful sequence.

use serde::{Deserialize, Serialize};

use crate::events::OrderKey;
use crate::identity::TermId;

/// Database codec trait for encoding/decoding types to/from bytes
pub trait DbCodec<T> {
    fn encode(obj: &T) -> Result<Vec<u8>, CodecError>;
    fn decode(data: &[u8]) -> Result<T, CodecError>;
}

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Failed to serialize data: {0}")]
    SerializationError(String),
    #[error("Failed to deserialize data: {0}")]
    DeserializationError(String),
    #[error("Invalid UTF-8 string: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Value codec using JSON serialization.
#[derive(Debug, Clone)]
pub struct JsonDbCodec;

impl<T> DbCodec<T> for JsonDbCodec
where
    T: Serialize + for<'de> Deserialize<'de>,
{
    fn encode(obj: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(obj).map_err(|e| CodecError::SerializationError(e.to_string()))
    }

    fn decode(data: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(data).map_err(|e| CodecError::DeserializationError(e.to_string()))
    }
}

/// Key types with an order-preserving byte encoding: the lexicographic
/// order of `encode_key` output must equal the logical order of the keys.
pub trait OrderedKey: Sized + Clone + std::fmt::Debug {
    fn encode_key(&self) -> Vec<u8>;
    fn decode_key(data: &[u8]) -> Result<Self, CodecError>;
}

/// Adapter exposing any [`OrderedKey`] as a [`DbCodec`].
#[derive(Debug, Clone)]
pub struct OrderedKeyCodec;

impl<K: OrderedKey> DbCodec<K> for OrderedKeyCodec {
    fn encode(obj: &K) -> Result<Vec<u8>, CodecError> {
        Ok(obj.encode_key())
    }

    fn decode(data: &[u8]) -> Result<K, CodecError> {
        K::decode_key(data)
    }
}

// Implementations for the primitive key types

impl OrderedKey for String {
    fn encode_key(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn decode_key(data: &[u8]) -> Result<Self, CodecError> {
        String::from_utf8(data.to_vec()).map_err(CodecError::from)
    }
}

impl OrderedKey for u64 {
    fn encode_key(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn decode_key(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() != 8 {
            return Err(CodecError::DeserializationError(format!(
                "Expected 8 bytes for u64, got {}",
                data.len()
            )));
        }
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(data);
        Ok(u64::from_be_bytes(bytes))
    }
}

impl OrderedKey for TermId {
    fn encode_key(&self) -> Vec<u8> {
        self.to_vec()
    }

    fn decode_key(data: &[u8]) -> Result<Self, CodecError> {
        TermId::from_slice(data).map_err(|e| CodecError::DeserializationError(e.to_string()))
    }
}

impl OrderedKey for OrderKey {
    fn encode_key(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(16);
        bytes.extend_from_slice(&self.block_number.to_be_bytes());
        bytes.extend_from_slice(&self.log_index.to_be_bytes());
        bytes
    }

    fn decode_key(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() != 16 {
            return Err(CodecError::DeserializationError(format!(
                "Expected 16 bytes for OrderKey, got {}",
                data.len()
            )));
        }
        let mut block = [0u8; 8];
        let mut log = [0u8; 8];
        block.copy_from_slice(&data[..8]);
        log.copy_from_slice(&data[8..]);
        Ok(OrderKey::new(u64::from_be_bytes(block), u64::from_be_bytes(log)))
    }
}
