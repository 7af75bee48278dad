//! Injected collaborators the engine treats as pure functions.
//!
//! Two pieces of behavior are supplied from outside the engine: deriving the
//! deterministic opposing-side identifier for a relationship, and decoding
//! raw entity payload bytes into text. Both are modeled as traits so tests
//! can substitute fixed implementations, and both must be deterministic for
//! replays to converge on the same state.

use ethers_core::utils::keccak256;

use crate::identity::TermId;

/// Domain tag hashed into the default opposing-id salt.
pub const OPPOSING_SALT_TAG: &str = "trellis/opposing-instrument/v1";

/// Derives the opposing instrument id for an affirming relationship id.
///
/// The mapping must be a pure function of the input id: the engine persists
/// the result once at relationship creation and never recomputes it.
pub trait OpposingIdDeriver: Send + Sync {
    fn derive(&self, affirming: &TermId) -> TermId;
}

/// Keccak-based deriver: `keccak256(salt || affirming_id)`.
pub struct KeccakDeriver {
    salt: [u8; 32],
}

impl KeccakDeriver {
    pub fn new(salt: [u8; 32]) -> Self {
        Self { salt }
    }

    /// Build a deriver whose salt is the keccak hash of a textual tag.
    pub fn from_tag(tag: &str) -> Self {
        Self {
            salt: keccak256(tag.as_bytes()),
        }
    }
}

impl Default for KeccakDeriver {
    fn default() -> Self {
        Self::from_tag(OPPOSING_SALT_TAG)
    }
}

impl OpposingIdDeriver for KeccakDeriver {
    fn derive(&self, affirming: &TermId) -> TermId {
        let mut buf = [0u8; 64];
        buf[..32].copy_from_slice(&self.salt);
        buf[32..].copy_from_slice(affirming.as_bytes());
        TermId::new(keccak256(buf))
    }
}

/// Decodes raw payload bytes to text, or reports that they are not text.
///
/// Implementations never fail: undecodable bytes yield `None` and the
/// entity stays pending resolution.
pub trait PayloadDecoder: Send + Sync {
    fn decode_text(&self, bytes: &[u8]) -> Option<String>;
}

/// Strict UTF-8 decoder. Rejects empty payloads and control characters
/// other than whitespace, which in practice filters out ABI-encoded blobs
/// that happen to be valid UTF-8.
pub struct Utf8Decoder;

impl PayloadDecoder for Utf8Decoder {
    fn decode_text(&self, bytes: &[u8]) -> Option<String> {
        if bytes.is_empty() {
            return None;
        }
        let text = std::str::from_utf8(bytes).ok()?;
        let printable = text
            .chars()
            .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'));
        printable.then(|| text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derivation_is_deterministic() {
        let deriver = KeccakDeriver::default();
        let id = TermId::new([7; 32]);
        assert_eq!(deriver.derive(&id), deriver.derive(&id));
    }

    #[test]
    fn test_derivation_depends_on_salt_and_input() {
        let a = KeccakDeriver::from_tag("salt-a");
        let b = KeccakDeriver::from_tag("salt-b");
        let id = TermId::new([7; 32]);
        let other = TermId::new([8; 32]);

        assert_ne!(a.derive(&id), b.derive(&id));
        assert_ne!(a.derive(&id), a.derive(&other));
        assert_ne!(a.derive(&id), id);
    }

    #[test]
    fn test_utf8_decoder_accepts_plain_text() {
        assert_eq!(
            Utf8Decoder.decode_text(b"hello world"),
            Some("hello world".to_string())
        );
        assert_eq!(
            Utf8Decoder.decode_text(b"line\nbreak"),
            Some("line\nbreak".to_string())
        );
    }

    #[test]
    fn test_utf8_decoder_rejects_binary_and_empty() {
        assert_eq!(Utf8Decoder.decode_text(&[0xff, 0xfe]), None);
        assert_eq!(Utf8Decoder.decode_text(&[0x00, 0x41]), None);
        assert_eq!(Utf8Decoder.decode_text(b""), None);
    }
}
