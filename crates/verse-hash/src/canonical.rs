//! Canonical digest framing and the hash newtypes shared by the ledger.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha3::digest::Update;
use sha3::{Digest, Sha3_256};
use std::fmt;
use thiserror::Error;

/// Errors raised while decoding hashes, keys, and secrets.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HashError {
    #[error("{field} is not valid hex: {reason}")]
    InvalidHex { field: &'static str, reason: String },

    #[error("{field} must be {expected} bytes, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("signing secret must be at least {min} bytes, got {actual}")]
    WeakSecret { min: usize, actual: usize },
}

/// Render a timestamp the way every digest sees it: RFC 3339, microsecond
/// precision, `Z` suffix.
pub fn canonical_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Feed one length-prefixed field into any digest or MAC state.
pub(crate) fn frame<H: Update>(state: &mut H, bytes: &[u8]) {
    Update::update(state, &(bytes.len() as u32).to_le_bytes());
    Update::update(state, bytes);
}

pub(crate) fn decode_hex<const N: usize>(
    field: &'static str,
    value: &str,
) -> Result<[u8; N], HashError> {
    let bytes = hex::decode(value).map_err(|e| HashError::InvalidHex {
        field,
        reason: e.to_string(),
    })?;
    if bytes.len() != N {
        return Err(HashError::InvalidLength {
            field,
            expected: N,
            actual: bytes.len(),
        });
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

/// Builder for a domain-separated SHA3-256 digest over an ordered field list.
///
/// The domain tag is the first field, so digests produced for different
/// purposes (content, block, certificate) never coincide even when the
/// remaining fields do.
pub struct CanonicalHasher {
    state: Sha3_256,
}

impl CanonicalHasher {
    pub fn new(domain: &str) -> Self {
        let mut state = Sha3_256::new();
        frame(&mut state, domain.as_bytes());
        Self { state }
    }

    pub fn field(mut self, value: &str) -> Self {
        frame(&mut self.state, value.as_bytes());
        self
    }

    pub fn field_time(self, timestamp: &DateTime<Utc>) -> Self {
        self.field(&canonical_timestamp(timestamp))
    }

    pub fn field_u64(mut self, value: u64) -> Self {
        frame(&mut self.state, &value.to_le_bytes());
        self
    }

    pub fn finish(self) -> [u8; 32] {
        self.state.finalize().into()
    }

    pub fn finish_hex(self) -> String {
        hex::encode(self.finish())
    }
}

/// Fingerprint of the substantive content of an event (lowercase hex SHA3-256).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Parse and normalize a hex-encoded 32-byte hash.
    pub fn parse(value: &str) -> Result<Self, HashError> {
        let bytes: [u8; 32] = decode_hex("content hash", value)?;
        Ok(Self(hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn from_digest(bytes: [u8; 32]) -> Self {
        Self(hex::encode(bytes))
    }
}

/// Stored values are taken as-is; verification decides whether they still hold.
impl From<String> for ContentHash {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hash binding a ledger entry to its chain predecessor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BlockHash(String);

impl BlockHash {
    /// Predecessor of the first entry in every chain scope.
    pub fn genesis() -> Self {
        Self("0".repeat(64))
    }

    pub fn is_genesis(&self) -> bool {
        self.0.len() == 64 && self.0.bytes().all(|b| b == b'0')
    }

    /// Parse and normalize a hex-encoded 32-byte hash.
    pub fn parse(value: &str) -> Result<Self, HashError> {
        let bytes: [u8; 32] = decode_hex("block hash", value)?;
        Ok(Self(hex::encode(bytes)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub(crate) fn from_digest(bytes: [u8; 32]) -> Self {
        Self(hex::encode(bytes))
    }
}

impl From<String> for BlockHash {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for BlockHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_genesis_is_all_zero() {
        let genesis = BlockHash::genesis();
        assert_eq!(genesis.as_str().len(), 64);
        assert!(genesis.is_genesis());
        assert!(!BlockHash::from("ab".repeat(32)).is_genesis());
    }

    #[test]
    fn test_parse_normalizes_case() {
        let upper = "AB".repeat(32);
        let parsed = BlockHash::parse(&upper).unwrap();
        assert_eq!(parsed.as_str(), "ab".repeat(32));
    }

    #[test]
    fn test_parse_rejects_wrong_length() {
        assert_eq!(
            ContentHash::parse("abcd"),
            Err(HashError::InvalidLength {
                field: "content hash",
                expected: 32,
                actual: 2,
            })
        );
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        assert!(matches!(
            ContentHash::parse(&"zz".repeat(32)),
            Err(HashError::InvalidHex { .. })
        ));
    }

    #[test]
    fn test_canonical_timestamp_uses_micros() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        assert_eq!(canonical_timestamp(&ts), "2024-03-01T12:30:00.000000Z");
    }

    #[test]
    fn test_field_boundaries_are_unambiguous() {
        let joined = CanonicalHasher::new("t").field("ab").field("c").finish_hex();
        let shifted = CanonicalHasher::new("t").field("a").field("bc").finish_hex();
        assert_ne!(joined, shifted);
    }

    #[test]
    fn test_domain_separates_digests() {
        let a = CanonicalHasher::new("one").field("x").finish_hex();
        let b = CanonicalHasher::new("two").field("x").finish_hex();
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_serializes_as_plain_string() {
        let hash = BlockHash::genesis();
        let json = serde_json::to_string(&hash).unwrap();
        assert_eq!(json, format!("\"{}\"", "0".repeat(64)));
    }
}
