//! Ed25519 witness attestations over block hashes.

use crate::canonical::{decode_hex, BlockHash, CanonicalHasher, HashError};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

const WITNESS_DOMAIN: &str = "verse.witness.v1";

/// An independent attestation of one block hash.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Witness {
    /// Identifier of the attester (e.g., "witness:notary")
    pub witness_id: String,
    /// Ed25519 signature as hex-encoded string (e.g., "ed25519:ab8...2f1")
    pub signature: String,
    /// Instant the attestation covers (the entry's creation time)
    pub timestamp: DateTime<Utc>,
}

/// A witness identity able to attest blocks.
#[derive(Clone)]
pub struct WitnessKey {
    id: String,
    signing_key: SigningKey,
}

impl WitnessKey {
    pub fn from_bytes(id: impl Into<String>, private_key: &[u8; 32]) -> Self {
        Self {
            id: id.into(),
            signing_key: SigningKey::from_bytes(private_key),
        }
    }

    pub fn from_hex(id: impl Into<String>, private_key_hex: &str) -> Result<Self, HashError> {
        let bytes: [u8; 32] = decode_hex("witness private key", private_key_hex.trim())?;
        Ok(Self::from_bytes(id, &bytes))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn attest(&self, block_hash: &BlockHash, timestamp: &DateTime<Utc>) -> Witness {
        let digest = attestation_digest(block_hash, timestamp);
        let signature = self.signing_key.sign(&digest);
        Witness {
            witness_id: self.id.clone(),
            signature: format!("ed25519:{}", hex::encode(signature.to_bytes())),
            timestamp: *timestamp,
        }
    }
}

impl fmt::Debug for WitnessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WitnessKey")
            .field("id", &self.id)
            .field("signing_key", &"<redacted>")
            .finish()
    }
}

/// Generate a new Ed25519 keypair.
///
/// Returns (private_key_bytes, public_key_bytes).
pub fn keygen() -> ([u8; 32], [u8; 32]) {
    let mut private_bytes = [0u8; 32];
    rand::rng().fill(&mut private_bytes);

    let signing_key = SigningKey::from_bytes(&private_bytes);
    let public_bytes = signing_key.verifying_key().to_bytes();

    (private_bytes, public_bytes)
}

fn attestation_digest(block_hash: &BlockHash, timestamp: &DateTime<Utc>) -> [u8; 32] {
    CanonicalHasher::new(WITNESS_DOMAIN)
        .field(block_hash.as_str())
        .field_time(timestamp)
        .finish()
}

/// Verify a witness attestation against the block it claims to cover.
///
/// Returns `false` for malformed signatures or keys rather than erroring.
pub fn verify_witness(witness: &Witness, block_hash: &BlockHash, public_key: &[u8; 32]) -> bool {
    let sig_hex = match witness.signature.strip_prefix("ed25519:") {
        Some(hex_str) => hex_str,
        None => return false,
    };

    let sig_array: [u8; 64] = match decode_hex("witness signature", sig_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };
    let signature = ed25519_dalek::Signature::from_bytes(&sig_array);

    let verifying_key = match VerifyingKey::from_bytes(public_key) {
        Ok(key) => key,
        Err(_) => return false,
    };

    let digest = attestation_digest(block_hash, &witness.timestamp);
    verifying_key.verify(&digest, &signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn block() -> BlockHash {
        BlockHash::from("1f".repeat(32))
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_keygen_generates_distinct_keys() {
        let (private1, public1) = keygen();
        let (private2, public2) = keygen();
        assert_ne!(private1, private2);
        assert_ne!(public1, public2);
    }

    #[test]
    fn test_attest_and_verify_succeeds() {
        let (private_key, public_key) = keygen();
        let key = WitnessKey::from_bytes("witness:notary", &private_key);

        let witness = key.attest(&block(), &at());

        assert_eq!(witness.witness_id, "witness:notary");
        assert!(witness.signature.starts_with("ed25519:"));
        assert_eq!(witness.timestamp, at());
        assert_eq!(key.public_key(), public_key);
        assert!(verify_witness(&witness, &block(), &public_key));
    }

    #[test]
    fn test_verify_with_wrong_public_key_fails() {
        let (private_key, _) = keygen();
        let (_, wrong_public_key) = keygen();
        let witness = WitnessKey::from_bytes("w", &private_key).attest(&block(), &at());

        assert!(!verify_witness(&witness, &block(), &wrong_public_key));
    }

    #[test]
    fn test_verify_other_block_fails() {
        let (private_key, public_key) = keygen();
        let witness = WitnessKey::from_bytes("w", &private_key).attest(&block(), &at());

        let other = BlockHash::from("2e".repeat(32));
        assert!(!verify_witness(&witness, &other, &public_key));
    }

    #[test]
    fn test_verify_moved_timestamp_fails() {
        let (private_key, public_key) = keygen();
        let mut witness = WitnessKey::from_bytes("w", &private_key).attest(&block(), &at());
        witness.timestamp = at() + chrono::Duration::seconds(1);

        assert!(!verify_witness(&witness, &block(), &public_key));
    }

    #[test]
    fn test_verify_signature_with_invalid_format() {
        let (_, public_key) = keygen();
        let mut witness = WitnessKey::from_bytes("w", &[9u8; 32]).attest(&block(), &at());

        witness.signature = "invalid-format".to_string();
        assert!(!verify_witness(&witness, &block(), &public_key));

        witness.signature = format!("ed25519:{}", "00".repeat(64));
        assert!(!verify_witness(&witness, &block(), &public_key));
    }

    #[test]
    fn test_from_hex_round_trips_key() {
        let (private_key, public_key) = keygen();
        let key = WitnessKey::from_hex("w", &hex::encode(private_key)).unwrap();
        assert_eq!(key.public_key(), public_key);
        assert!(WitnessKey::from_hex("w", "abcd").is_err());
    }

    #[test]
    fn test_debug_hides_private_key() {
        let key = WitnessKey::from_bytes("witness:notary", &[5u8; 32]);
        let shown = format!("{key:?}");
        assert!(shown.contains("witness:notary"));
        assert!(shown.contains("redacted"));
    }
}
