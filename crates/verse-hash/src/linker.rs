//! Chain linking and keyed entry signatures.

use crate::canonical::{
    canonical_timestamp, frame, BlockHash, CanonicalHasher, ContentHash, HashError,
};
use crate::witness::{Witness, WitnessKey};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

const BLOCK_DOMAIN: &str = "verse.block.v1";
const SIGNATURE_DOMAIN: &[u8] = b"verse.signature.v1";

/// Shortest secret accepted for the chain MAC.
pub const MIN_SECRET_LEN: usize = 16;

/// Process-wide HMAC key for entry and certificate signatures.
///
/// Never printed: `Debug` is redacted.
#[derive(Clone)]
pub struct SigningSecret(Vec<u8>);

impl SigningSecret {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, HashError> {
        let bytes = bytes.into();
        if bytes.len() < MIN_SECRET_LEN {
            return Err(HashError::WeakSecret {
                min: MIN_SECRET_LEN,
                actual: bytes.len(),
            });
        }
        Ok(Self(bytes))
    }

    pub fn from_hex(value: &str) -> Result<Self, HashError> {
        let bytes = hex::decode(value.trim()).map_err(|e| HashError::InvalidHex {
            field: "signing secret",
            reason: e.to_string(),
        })?;
        Self::new(bytes)
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret(<redacted>)")
    }
}

/// `H(previous_block_hash ∥ content_hash ∥ timestamp ∥ author_id)`.
///
/// Needs no key: anyone holding the entry can recompute it.
pub fn compute_block_hash(
    content_hash: &ContentHash,
    previous_block_hash: &BlockHash,
    timestamp: &DateTime<Utc>,
    author_id: &str,
) -> BlockHash {
    let digest = CanonicalHasher::new(BLOCK_DOMAIN)
        .field(previous_block_hash.as_str())
        .field(content_hash.as_str())
        .field_time(timestamp)
        .field(author_id)
        .finish();
    BlockHash::from_digest(digest)
}

/// Computes block hashes, signs them with the ledger secret, and collects
/// witness attestations.
#[derive(Debug, Clone)]
pub struct ChainLinker {
    secret: SigningSecret,
    witnesses: Vec<WitnessKey>,
}

impl ChainLinker {
    pub fn new(secret: SigningSecret) -> Self {
        Self {
            secret,
            witnesses: Vec::new(),
        }
    }

    /// Attach witnesses that attest every block this linker seals.
    pub fn with_witnesses(mut self, witnesses: Vec<WitnessKey>) -> Self {
        self.witnesses = witnesses;
        self
    }

    pub fn witnesses(&self) -> &[WitnessKey] {
        &self.witnesses
    }

    pub fn link(
        &self,
        content_hash: &ContentHash,
        previous_block_hash: &BlockHash,
        timestamp: &DateTime<Utc>,
        author_id: &str,
    ) -> BlockHash {
        compute_block_hash(content_hash, previous_block_hash, timestamp, author_id)
    }

    /// `HMAC(secret, content_hash ∥ block_hash ∥ timestamp)` as lowercase hex.
    pub fn sign(
        &self,
        content_hash: &ContentHash,
        block_hash: &BlockHash,
        timestamp: &DateTime<Utc>,
    ) -> String {
        let mac = self.entry_mac(content_hash, block_hash, timestamp);
        hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of an entry signature.
    pub fn verify_signature(
        &self,
        content_hash: &ContentHash,
        block_hash: &BlockHash,
        timestamp: &DateTime<Utc>,
        signature: &str,
    ) -> bool {
        let Ok(bytes) = hex::decode(signature) else {
            return false;
        };
        self.entry_mac(content_hash, block_hash, timestamp)
            .verify_slice(&bytes)
            .is_ok()
    }

    /// Collect one attestation per configured witness.
    pub fn attest(&self, block_hash: &BlockHash, timestamp: &DateTime<Utc>) -> Vec<Witness> {
        self.witnesses
            .iter()
            .map(|witness| witness.attest(block_hash, timestamp))
            .collect()
    }

    /// MAC an already-computed digest under a domain tag (used for certificates).
    pub fn sign_digest(&self, domain: &str, digest: &str) -> String {
        let mac = self.digest_mac(domain, digest);
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn verify_digest(&self, domain: &str, digest: &str, signature: &str) -> bool {
        let Ok(bytes) = hex::decode(signature) else {
            return false;
        };
        self.digest_mac(domain, digest).verify_slice(&bytes).is_ok()
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(&self.secret.0).expect("HMAC can take key of any size")
    }

    fn entry_mac(
        &self,
        content_hash: &ContentHash,
        block_hash: &BlockHash,
        timestamp: &DateTime<Utc>,
    ) -> HmacSha256 {
        let mut mac = self.mac();
        frame(&mut mac, SIGNATURE_DOMAIN);
        frame(&mut mac, content_hash.as_str().as_bytes());
        frame(&mut mac, block_hash.as_str().as_bytes());
        frame(&mut mac, canonical_timestamp(timestamp).as_bytes());
        mac
    }

    fn digest_mac(&self, domain: &str, digest: &str) -> HmacSha256 {
        let mut mac = self.mac();
        frame(&mut mac, domain.as_bytes());
        frame(&mut mac, digest.as_bytes());
        mac
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;
    use chrono::TimeZone;

    fn linker() -> ChainLinker {
        ChainLinker::new(SigningSecret::new(vec![42u8; 32]).unwrap())
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
    }

    #[test]
    fn test_weak_secret_rejected() {
        assert_eq!(
            SigningSecret::new(vec![1u8; 4]).unwrap_err(),
            HashError::WeakSecret { min: 16, actual: 4 }
        );
    }

    #[test]
    fn test_secret_debug_is_redacted() {
        let secret = SigningSecret::from_hex(&"ab".repeat(32)).unwrap();
        let shown = format!("{secret:?} {:?}", linker());
        assert!(!shown.contains("abab"));
        assert!(shown.contains("redacted"));
    }

    #[test]
    fn test_link_is_pure() {
        let content = fingerprint("t", "b", "author:a", &at());
        let a = linker().link(&content, &BlockHash::genesis(), &at(), "author:a");
        let b = compute_block_hash(&content, &BlockHash::genesis(), &at(), "author:a");
        assert_eq!(a, b);
    }

    #[test]
    fn test_link_depends_on_predecessor() {
        let content = fingerprint("t", "b", "author:a", &at());
        let first = compute_block_hash(&content, &BlockHash::genesis(), &at(), "author:a");
        let second = compute_block_hash(&content, &first, &at(), "author:a");
        assert_ne!(first, second);
    }

    #[test]
    fn test_sign_and_verify() {
        let linker = linker();
        let content = fingerprint("t", "b", "author:a", &at());
        let block = linker.link(&content, &BlockHash::genesis(), &at(), "author:a");
        let sig = linker.sign(&content, &block, &at());

        assert_eq!(sig.len(), 64);
        assert!(linker.verify_signature(&content, &block, &at(), &sig));
    }

    #[test]
    fn test_signature_requires_same_secret() {
        let content = fingerprint("t", "b", "author:a", &at());
        let block = compute_block_hash(&content, &BlockHash::genesis(), &at(), "author:a");
        let sig = linker().sign(&content, &block, &at());

        let other = ChainLinker::new(SigningSecret::new(vec![7u8; 32]).unwrap());
        assert!(!other.verify_signature(&content, &block, &at(), &sig));
    }

    #[test]
    fn test_signature_binds_timestamp() {
        let linker = linker();
        let content = fingerprint("t", "b", "author:a", &at());
        let block = linker.link(&content, &BlockHash::genesis(), &at(), "author:a");
        let sig = linker.sign(&content, &block, &at());

        let later = at() + chrono::Duration::microseconds(1);
        assert!(!linker.verify_signature(&content, &block, &later, &sig));
    }

    #[test]
    fn test_verify_rejects_garbage_signature() {
        let linker = linker();
        let content = fingerprint("t", "b", "author:a", &at());
        let block = linker.link(&content, &BlockHash::genesis(), &at(), "author:a");
        assert!(!linker.verify_signature(&content, &block, &at(), "not-hex"));
        assert!(!linker.verify_signature(&content, &block, &at(), ""));
    }

    #[test]
    fn test_digest_signature_is_domain_bound() {
        let linker = linker();
        let sig = linker.sign_digest("verse.certificate.v1", "abc");
        assert!(linker.verify_digest("verse.certificate.v1", "abc", &sig));
        assert!(!linker.verify_digest("verse.other.v1", "abc", &sig));
        assert!(!linker.verify_digest("verse.certificate.v1", "abd", &sig));
    }
}
