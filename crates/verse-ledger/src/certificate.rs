//! Authorship certificates.
//!
//! A certificate is a disposable snapshot: it is never written to the ledger,
//! and validating it always re-reads the live chain.

use crate::error::LedgerError;
use crate::store::LedgerStore;
use crate::types::EntryFilter;
use crate::verify::{verify_entries, ChainBreak};
use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{info, warn};
use uuid::Uuid;
use verse_hash::{BlockHash, CanonicalHasher, ChainLinker};

const CERTIFICATE_DOMAIN: &str = "verse.certificate.v1";

/// Signed statement that a subject's chain verified at `issued_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub subject_id: String,
    pub certificate_id: Uuid,
    pub issued_at: DateTime<Utc>,

    /// Author of the first entry in the chain.
    pub original_author: String,

    /// Creation time of the first entry in the chain.
    pub creation_date: DateTime<Utc>,

    pub chain_length: u64,

    /// Block hash of the last entry at issuance.
    pub tip_block_hash: BlockHash,

    /// Hash over every field above.
    pub certificate_hash: String,

    /// Ledger MAC over `certificate_hash`.
    pub signature: String,
}

impl Certificate {
    /// Recompute the hash over the certificate's stated fields.
    pub fn compute_hash(&self) -> String {
        CanonicalHasher::new(CERTIFICATE_DOMAIN)
            .field(&self.subject_id)
            .field(&self.certificate_id.to_string())
            .field_time(&self.issued_at)
            .field(&self.original_author)
            .field_time(&self.creation_date)
            .field_u64(self.chain_length)
            .field(self.tip_block_hash.as_str())
            .finish_hex()
    }

    pub fn from_json(json: &str) -> Result<Self, LedgerError> {
        let certificate: Certificate = serde_json::from_str(json)
            .map_err(|e| LedgerError::MalformedCertificate(e.to_string()))?;
        certificate.check_structure()?;
        Ok(certificate)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    fn check_structure(&self) -> Result<(), LedgerError> {
        let malformed = |reason: &str| Err(LedgerError::MalformedCertificate(reason.to_string()));

        if self.subject_id.trim().is_empty() {
            return malformed("subject_id is empty");
        }
        if self.chain_length == 0 {
            return malformed("chain_length is zero");
        }
        if !is_digest_hex(&self.certificate_hash) {
            return malformed("certificate_hash is not a 32-byte hex digest");
        }
        if !is_digest_hex(self.tip_block_hash.as_str()) {
            return malformed("tip_block_hash is not a 32-byte hex digest");
        }
        if self.signature.is_empty() {
            return malformed("signature is empty");
        }
        Ok(())
    }
}

fn is_digest_hex(value: &str) -> bool {
    value.len() == 64 && value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Overall verdict of a certificate check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CertificateStatus {
    /// Intact, and the chain is exactly as certified.
    Valid,
    /// Intact, but the chain has moved on since issuance.
    Stale {
        issued_length: u64,
        current_length: u64,
    },
    /// Hash or signature does not match the stated fields.
    Forged,
    /// Intact, but the live chain no longer verifies.
    ChainBroken(ChainBreak),
    /// Intact, and the chain verifies, but the certified tip is no longer at
    /// its certified position: entries were removed or replaced.
    Rewritten {
        issued_length: u64,
        current_length: u64,
    },
    /// Not a structurally valid certificate.
    Malformed(String),
}

impl fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CertificateStatus::Valid => write!(f, "valid"),
            CertificateStatus::Stale {
                issued_length,
                current_length,
            } => write!(
                f,
                "stale (issued at {issued_length} entries, chain now has {current_length})"
            ),
            CertificateStatus::Forged => write!(f, "forged (hash or signature mismatch)"),
            CertificateStatus::ChainBroken(brk) => write!(
                f,
                "chain broken: {} at entry {} ({})",
                brk.kind, brk.entry.index, brk.entry.block_hash
            ),
            CertificateStatus::Rewritten {
                issued_length,
                current_length,
            } => write!(
                f,
                "rewritten (certified tip not at entry {issued_length}, chain has {current_length})"
            ),
            CertificateStatus::Malformed(reason) => write!(f, "malformed: {reason}"),
        }
    }
}

/// Result of re-checking a certificate against live state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateValidation {
    /// Both checks passed.
    pub valid: bool,
    /// Hash and signature match the certificate's stated fields.
    pub certificate_intact: bool,
    /// The chain verifies and still has the certified length and tip.
    pub chain_still_valid: bool,
    pub status: CertificateStatus,
}

impl CertificateValidation {
    fn malformed(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            certificate_intact: false,
            chain_still_valid: false,
            status: CertificateStatus::Malformed(reason.into()),
        }
    }
}

/// Issues certificates for chains that currently verify.
pub struct CertificateIssuer<'a> {
    store: &'a dyn LedgerStore,
    linker: &'a ChainLinker,
}

impl<'a> CertificateIssuer<'a> {
    pub fn new(store: &'a dyn LedgerStore, linker: &'a ChainLinker) -> Self {
        Self { store, linker }
    }

    /// Certify the chain of `subject_id`.
    ///
    /// Fails with [`LedgerError::InvalidChain`] when the chain is broken, or
    /// empty (`broken_at: None`).
    pub fn issue(&self, subject_id: &str) -> Result<Certificate, LedgerError> {
        let entries = self.store.query(&EntryFilter::subject(subject_id))?;

        if let Err(brk) = verify_entries(&entries, self.linker) {
            warn!(subject_id, kind = %brk.kind, index = brk.entry.index, "refusing to certify broken chain");
            return Err(LedgerError::InvalidChain {
                subject_id: subject_id.to_string(),
                broken_at: Some(brk),
            });
        }

        let (Some(first), Some(last)) = (entries.first(), entries.last()) else {
            return Err(LedgerError::InvalidChain {
                subject_id: subject_id.to_string(),
                broken_at: None,
            });
        };

        let mut certificate = Certificate {
            subject_id: subject_id.to_string(),
            certificate_id: Uuid::new_v4(),
            issued_at: Utc::now().trunc_subsecs(6),
            original_author: first.author_id.clone(),
            creation_date: first.created_at,
            chain_length: entries.len() as u64,
            tip_block_hash: last.block_hash.clone(),
            certificate_hash: String::new(),
            signature: String::new(),
        };
        certificate.certificate_hash = certificate.compute_hash();
        certificate.signature = self
            .linker
            .sign_digest(CERTIFICATE_DOMAIN, &certificate.certificate_hash);

        info!(
            subject_id,
            certificate_id = %certificate.certificate_id,
            chain_length = certificate.chain_length,
            "issued certificate"
        );
        Ok(certificate)
    }
}

/// Re-checks certificates against the live chain.
pub struct CertificateValidator<'a> {
    store: &'a dyn LedgerStore,
    linker: &'a ChainLinker,
}

impl<'a> CertificateValidator<'a> {
    pub fn new(store: &'a dyn LedgerStore, linker: &'a ChainLinker) -> Self {
        Self { store, linker }
    }

    /// Validate `certificate`.
    ///
    /// A bad certificate is a negative result; only store failures are errors.
    pub fn validate(&self, certificate: &Certificate) -> Result<CertificateValidation, LedgerError> {
        if let Err(err) = certificate.check_structure() {
            return Ok(CertificateValidation::malformed(malformed_reason(err)));
        }

        let certificate_intact = certificate.compute_hash() == certificate.certificate_hash
            && self.linker.verify_digest(
                CERTIFICATE_DOMAIN,
                &certificate.certificate_hash,
                &certificate.signature,
            );

        let entries = self
            .store
            .query(&EntryFilter::subject(&certificate.subject_id))?;
        let broken_at = verify_entries(&entries, self.linker).err();
        let issued_length = certificate.chain_length;
        let current_length = entries.len() as u64;

        // Hash of the entry sitting where the certified tip was.
        let certified_slot = usize::try_from(issued_length - 1)
            .ok()
            .and_then(|i| entries.get(i))
            .map(|e| &e.block_hash);
        let tip_in_place = certified_slot == Some(&certificate.tip_block_hash);
        let chain_still_valid =
            broken_at.is_none() && tip_in_place && current_length == issued_length;

        let status = if !certificate_intact {
            CertificateStatus::Forged
        } else if let Some(brk) = broken_at {
            CertificateStatus::ChainBroken(brk)
        } else if !tip_in_place {
            CertificateStatus::Rewritten {
                issued_length,
                current_length,
            }
        } else if current_length > issued_length {
            CertificateStatus::Stale {
                issued_length,
                current_length,
            }
        } else {
            CertificateStatus::Valid
        };

        if status != CertificateStatus::Valid {
            warn!(
                subject_id = %certificate.subject_id,
                certificate_id = %certificate.certificate_id,
                %status,
                "certificate did not validate"
            );
        }

        Ok(CertificateValidation {
            valid: certificate_intact && chain_still_valid,
            certificate_intact,
            chain_still_valid,
            status,
        })
    }

    /// Parse untrusted certificate JSON and validate it.
    pub fn validate_json(&self, json: &str) -> Result<CertificateValidation, LedgerError> {
        match Certificate::from_json(json) {
            Ok(certificate) => self.validate(&certificate),
            Err(err) => Ok(CertificateValidation::malformed(malformed_reason(err))),
        }
    }
}

fn malformed_reason(err: LedgerError) -> String {
    match err {
        LedgerError::MalformedCertificate(reason) => reason,
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{EntryDraft, EventType};
    use verse_hash::{fingerprint, SigningSecret};

    fn linker() -> ChainLinker {
        ChainLinker::new(SigningSecret::new(vec![13u8; 32]).unwrap())
    }

    fn append(store: &MemoryStore, linker: &ChainLinker, subject: &str, body: &str) {
        let at = Utc::now();
        let draft = EntryDraft::new(
            EventType::Updated,
            subject,
            "author:ana",
            fingerprint("t", body, "author:ana", &at),
        );
        let tip = crate::store::tip_hash(store.latest(subject).unwrap().as_ref());
        store.append(draft, &tip, linker).unwrap();
    }

    #[test]
    fn test_issue_then_validate_is_valid() {
        let store = MemoryStore::new();
        let linker = linker();
        append(&store, &linker, "P1", "a");
        append(&store, &linker, "P1", "b");

        let cert = CertificateIssuer::new(&store, &linker).issue("P1").unwrap();
        assert_eq!(cert.chain_length, 2);
        assert_eq!(cert.original_author, "author:ana");

        let result = CertificateValidator::new(&store, &linker)
            .validate(&cert)
            .unwrap();
        assert!(result.valid);
        assert_eq!(result.status, CertificateStatus::Valid);
    }

    #[test]
    fn test_empty_chain_cannot_be_certified() {
        let store = MemoryStore::new();
        let linker = linker();
        match CertificateIssuer::new(&store, &linker).issue("P9") {
            Err(LedgerError::InvalidChain { broken_at, .. }) => assert!(broken_at.is_none()),
            other => panic!("expected InvalidChain, got {other:?}"),
        }
    }

    #[test]
    fn test_edited_field_is_forged() {
        let store = MemoryStore::new();
        let linker = linker();
        append(&store, &linker, "P1", "a");

        let mut cert = CertificateIssuer::new(&store, &linker).issue("P1").unwrap();
        cert.original_author = "author:mallory".to_string();

        let result = CertificateValidator::new(&store, &linker)
            .validate(&cert)
            .unwrap();
        assert!(!result.certificate_intact);
        assert!(result.chain_still_valid);
        assert_eq!(result.status, CertificateStatus::Forged);
    }

    #[test]
    fn test_rehashed_without_secret_is_forged() {
        let store = MemoryStore::new();
        let linker = linker();
        append(&store, &linker, "P1", "a");

        let mut cert = CertificateIssuer::new(&store, &linker).issue("P1").unwrap();
        cert.original_author = "author:mallory".to_string();
        cert.certificate_hash = cert.compute_hash();

        let result = CertificateValidator::new(&store, &linker)
            .validate(&cert)
            .unwrap();
        assert_eq!(result.status, CertificateStatus::Forged);
    }

    #[test]
    fn test_grown_chain_is_stale() {
        let store = MemoryStore::new();
        let linker = linker();
        append(&store, &linker, "P1", "a");
        let cert = CertificateIssuer::new(&store, &linker).issue("P1").unwrap();
        append(&store, &linker, "P1", "b");

        let result = CertificateValidator::new(&store, &linker)
            .validate(&cert)
            .unwrap();
        assert!(result.certificate_intact);
        assert!(!result.chain_still_valid);
        assert!(!result.valid);
        assert_eq!(
            result.status,
            CertificateStatus::Stale {
                issued_length: 1,
                current_length: 2
            }
        );
    }

    #[test]
    fn test_replaced_chain_of_same_length_is_rewritten() {
        let linker = linker();
        let original = MemoryStore::new();
        append(&original, &linker, "P1", "a");
        let cert = CertificateIssuer::new(&original, &linker)
            .issue("P1")
            .unwrap();

        let replaced = MemoryStore::new();
        append(&replaced, &linker, "P1", "z");

        let result = CertificateValidator::new(&replaced, &linker)
            .validate(&cert)
            .unwrap();
        assert!(result.certificate_intact);
        assert!(!result.chain_still_valid);
        assert!(!result.valid);
        assert_eq!(
            result.status,
            CertificateStatus::Rewritten {
                issued_length: 1,
                current_length: 1
            }
        );
    }

    #[test]
    fn test_longer_chain_without_certified_tip_is_rewritten() {
        let linker = linker();
        let original = MemoryStore::new();
        append(&original, &linker, "P1", "a");
        let cert = CertificateIssuer::new(&original, &linker)
            .issue("P1")
            .unwrap();

        let replaced = MemoryStore::new();
        append(&replaced, &linker, "P1", "y");
        append(&replaced, &linker, "P1", "z");

        let result = CertificateValidator::new(&replaced, &linker)
            .validate(&cert)
            .unwrap();
        assert_eq!(
            result.status,
            CertificateStatus::Rewritten {
                issued_length: 1,
                current_length: 2
            }
        );
    }

    #[test]
    fn test_json_round_trip_and_garbage() {
        let store = MemoryStore::new();
        let linker = linker();
        append(&store, &linker, "P1", "a");
        let cert = CertificateIssuer::new(&store, &linker).issue("P1").unwrap();

        let validator = CertificateValidator::new(&store, &linker);
        let json = cert.to_json_pretty().unwrap();
        let parsed = Certificate::from_json(&json).unwrap();
        assert_eq!(parsed, cert);
        assert!(validator.validate_json(&json).unwrap().valid);

        let garbage = validator.validate_json("{\"subject_id\": 7}").unwrap();
        assert!(!garbage.valid);
        assert!(matches!(garbage.status, CertificateStatus::Malformed(_)));
    }

    #[test]
    fn test_structural_checks() {
        let store = MemoryStore::new();
        let linker = linker();
        append(&store, &linker, "P1", "a");
        let mut cert = CertificateIssuer::new(&store, &linker).issue("P1").unwrap();
        cert.chain_length = 0;

        let result = CertificateValidator::new(&store, &linker)
            .validate(&cert)
            .unwrap();
        assert_eq!(
            result.status,
            CertificateStatus::Malformed("chain_length is zero".to_string())
        );
    }
}
