//! Chain integrity verification.
//!
//! Two independent checks run over a subject's entries in creation order:
//! linkage (each entry points at its predecessor's block hash) and
//! recomputation (each entry's block hash and signature are re-derived from its
//! own fields). The first is what catches a removed or reordered entry, the
//! second a doctored one whose links were left intact.

use crate::error::LedgerError;
use crate::store::LedgerStore;
use crate::types::{EntryFilter, LedgerEntry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};
use verse_hash::{compute_block_hash, verify_witness, BlockHash, ChainLinker};

/// Position of an entry within its subject's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRef {
    /// Zero-based position in creation order.
    pub index: usize,
    pub block_hash: BlockHash,
    pub created_at: DateTime<Utc>,
}

impl EntryRef {
    fn of(index: usize, entry: &LedgerEntry) -> Self {
        Self {
            index,
            block_hash: entry.block_hash.clone(),
            created_at: entry.created_at,
        }
    }
}

/// What failed at a break point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakKind {
    /// First entry does not link to the genesis sentinel.
    GenesisMismatch,
    /// `previous_block_hash` is not the predecessor's block hash.
    BrokenLink,
    /// `created_at` does not strictly increase.
    OutOfOrder,
    /// Stored block hash differs from the recomputed one.
    BlockHashMismatch,
    /// Signature does not verify under the ledger secret.
    SignatureMismatch,
}

impl fmt::Display for BreakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            BreakKind::GenesisMismatch => "first entry does not start from genesis",
            BreakKind::BrokenLink => "broken link to predecessor",
            BreakKind::OutOfOrder => "creation time out of order",
            BreakKind::BlockHashMismatch => "block hash mismatch",
            BreakKind::SignatureMismatch => "signature mismatch",
        };
        f.write_str(text)
    }
}

/// First point at which a chain fails verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    pub entry: EntryRef,
    pub kind: BreakKind,
}

/// Outcome of verifying one subject's chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub subject_id: String,
    pub valid: bool,
    /// Number of entries examined.
    pub chain_length: usize,
    /// Block hash of the last entry, if any.
    pub tip: Option<BlockHash>,
    pub broken_at: Option<ChainBreak>,
}

/// Verify entries that are already in creation order.
///
/// An empty slice is vacuously valid.
pub fn verify_entries(entries: &[LedgerEntry], linker: &ChainLinker) -> Result<(), ChainBreak> {
    let mut previous: Option<&LedgerEntry> = None;

    for (index, entry) in entries.iter().enumerate() {
        let broken = |kind| ChainBreak {
            entry: EntryRef::of(index, entry),
            kind,
        };

        match previous {
            None if !entry.previous_block_hash.is_genesis() => {
                return Err(broken(BreakKind::GenesisMismatch));
            }
            Some(prev) if entry.previous_block_hash != prev.block_hash => {
                return Err(broken(BreakKind::BrokenLink));
            }
            Some(prev) if entry.created_at <= prev.created_at => {
                return Err(broken(BreakKind::OutOfOrder));
            }
            _ => {}
        }

        let recomputed = compute_block_hash(
            &entry.content_hash,
            &entry.previous_block_hash,
            &entry.created_at,
            &entry.author_id,
        );
        if recomputed != entry.block_hash {
            return Err(broken(BreakKind::BlockHashMismatch));
        }

        if !linker.verify_signature(
            &entry.content_hash,
            &entry.block_hash,
            &entry.created_at,
            &entry.signature,
        ) {
            return Err(broken(BreakKind::SignatureMismatch));
        }

        previous = Some(entry);
    }

    Ok(())
}

/// Verify the chain of `subject_id` as it currently stands in `store`.
///
/// Only store failures are errors; a broken chain is an invalid report.
pub fn verify_chain(
    store: &dyn LedgerStore,
    linker: &ChainLinker,
    subject_id: &str,
) -> Result<VerificationReport, LedgerError> {
    let entries = store.query(&EntryFilter::subject(subject_id))?;
    let broken_at = verify_entries(&entries, linker).err();

    match &broken_at {
        Some(brk) => warn!(
            subject_id,
            index = brk.entry.index,
            block_hash = %brk.entry.block_hash,
            kind = %brk.kind,
            "chain verification failed"
        ),
        None => debug!(subject_id, entries = entries.len(), "chain verified"),
    }

    Ok(VerificationReport {
        subject_id: subject_id.to_string(),
        valid: broken_at.is_none(),
        chain_length: entries.len(),
        tip: entries.last().map(|e| e.block_hash.clone()),
        broken_at,
    })
}

/// Errors from checking witness attestations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WitnessError {
    #[error("entry {index} is missing an attestation from {witness_id}")]
    MissingWitness { index: usize, witness_id: String },

    #[error("no public key for witness {0}")]
    UnknownWitness(String),

    #[error("attestation by {witness_id} on entry {index} failed verification")]
    InvalidAttestation { index: usize, witness_id: String },
}

/// Check every witness attestation on `entries`.
///
/// # Arguments
/// * `public_keys` - witness id to Ed25519 public key
/// * `required` - witness ids that must have attested every entry
pub fn verify_witnesses(
    entries: &[LedgerEntry],
    public_keys: &HashMap<String, [u8; 32]>,
    required: Option<&[String]>,
) -> Result<(), WitnessError> {
    for (index, entry) in entries.iter().enumerate() {
        if let Some(required) = required {
            for witness_id in required {
                if !entry.witnesses.iter().any(|w| &w.witness_id == witness_id) {
                    return Err(WitnessError::MissingWitness {
                        index,
                        witness_id: witness_id.clone(),
                    });
                }
            }
        }

        for witness in &entry.witnesses {
            let public_key = public_keys
                .get(&witness.witness_id)
                .ok_or_else(|| WitnessError::UnknownWitness(witness.witness_id.clone()))?;

            if !verify_witness(witness, &entry.block_hash, public_key) {
                return Err(WitnessError::InvalidAttestation {
                    index,
                    witness_id: witness.witness_id.clone(),
                });
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{seal, tip_hash};
    use crate::types::{EntryDraft, EventType};
    use chrono::TimeZone;
    use proptest::prelude::*;
    use verse_hash::{fingerprint, ContentHash, SigningSecret, WitnessKey};

    fn linker() -> ChainLinker {
        ChainLinker::new(SigningSecret::new(vec![5u8; 32]).unwrap())
    }

    fn build_chain(linker: &ChainLinker, n: usize) -> Vec<LedgerEntry> {
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let mut entries: Vec<LedgerEntry> = Vec::new();
        for i in 0..n {
            let draft = EntryDraft::new(
                if i == 0 {
                    EventType::Created
                } else {
                    EventType::Updated
                },
                "P1",
                "author:ana",
                fingerprint("t", &format!("version {i}"), "author:ana", &start),
            );
            let now = start + chrono::Duration::seconds(i as i64);
            let entry = seal(draft, entries.last(), linker, now);
            entries.push(entry);
        }
        entries
    }

    fn flip_first_hex_digit(hash: &ContentHash) -> ContentHash {
        let s = hash.as_str();
        let first = if s.starts_with('0') { '1' } else { '0' };
        ContentHash::from(format!("{first}{}", &s[1..]))
    }

    #[test]
    fn test_verify_empty_chain() {
        assert!(verify_entries(&[], &linker()).is_ok());
    }

    #[test]
    fn test_verify_valid_chain() {
        let linker = linker();
        let entries = build_chain(&linker, 4);
        assert!(verify_entries(&entries, &linker).is_ok());
        assert_eq!(tip_hash(entries.last()), entries[3].block_hash);
    }

    #[test]
    fn test_missing_entry_breaks_link() {
        let linker = linker();
        let mut entries = build_chain(&linker, 3);
        entries.remove(1);

        let brk = verify_entries(&entries, &linker).unwrap_err();
        assert_eq!(brk.kind, BreakKind::BrokenLink);
        assert_eq!(brk.entry.index, 1);
    }

    #[test]
    fn test_dropped_first_entry_is_genesis_mismatch() {
        let linker = linker();
        let entries = build_chain(&linker, 2);

        let brk = verify_entries(&entries[1..], &linker).unwrap_err();
        assert_eq!(brk.kind, BreakKind::GenesisMismatch);
        assert_eq!(brk.entry.index, 0);
    }

    #[test]
    fn test_rewritten_author_is_block_hash_mismatch() {
        let linker = linker();
        let mut entries = build_chain(&linker, 2);
        entries[0].author_id = "author:mallory".to_string();

        let brk = verify_entries(&entries, &linker).unwrap_err();
        assert_eq!(brk.kind, BreakKind::BlockHashMismatch);
        assert_eq!(brk.entry.index, 0);
    }

    #[test]
    fn test_foreign_secret_is_signature_mismatch() {
        let entries = build_chain(&linker(), 2);
        let other = ChainLinker::new(SigningSecret::new(vec![6u8; 32]).unwrap());

        let brk = verify_entries(&entries, &other).unwrap_err();
        assert_eq!(brk.kind, BreakKind::SignatureMismatch);
        assert_eq!(brk.entry.index, 0);
    }

    #[test]
    fn test_reordered_timestamps_detected() {
        let linker = linker();
        let mut entries = build_chain(&linker, 2);
        // Re-seal the second entry with a timestamp before the first.
        let earlier = entries[0].created_at - chrono::Duration::seconds(10);
        let draft = EntryDraft::new(
            entries[1].event_type,
            "P1",
            "author:ana",
            entries[1].content_hash.clone(),
        );
        let mut resealed = seal(draft, None, &linker, earlier);
        resealed.previous_block_hash = entries[0].block_hash.clone();
        entries[1] = resealed;

        let brk = verify_entries(&entries, &linker).unwrap_err();
        assert_eq!(brk.kind, BreakKind::OutOfOrder);
        assert_eq!(brk.entry.index, 1);
    }

    #[test]
    fn test_witnesses_verify_against_public_keys() {
        let notary = WitnessKey::from_bytes("witness:notary", &[9u8; 32]);
        let mut keys = HashMap::new();
        keys.insert("witness:notary".to_string(), notary.public_key());
        let linker = linker().with_witnesses(vec![notary]);

        let entries = build_chain(&linker, 2);
        let required = vec!["witness:notary".to_string()];
        assert!(verify_witnesses(&entries, &keys, Some(&required)).is_ok());
    }

    #[test]
    fn test_witness_errors() {
        let notary = WitnessKey::from_bytes("witness:notary", &[9u8; 32]);
        let impostor = WitnessKey::from_bytes("witness:notary", &[8u8; 32]);

        let entries = build_chain(&linker(), 1);
        let required = vec!["witness:notary".to_string()];
        assert_eq!(
            verify_witnesses(&entries, &HashMap::new(), Some(&required)),
            Err(WitnessError::MissingWitness {
                index: 0,
                witness_id: "witness:notary".to_string()
            })
        );

        let attested = build_chain(&linker().with_witnesses(vec![impostor]), 1);
        assert_eq!(
            verify_witnesses(&attested, &HashMap::new(), None),
            Err(WitnessError::UnknownWitness("witness:notary".to_string()))
        );

        let mut keys = HashMap::new();
        keys.insert("witness:notary".to_string(), notary.public_key());
        assert_eq!(
            verify_witnesses(&attested, &keys, None),
            Err(WitnessError::InvalidAttestation {
                index: 0,
                witness_id: "witness:notary".to_string()
            })
        );
    }

    proptest! {
        #[test]
        fn prop_tamper_reported_at_its_position(n in 1usize..8, k_seed in any::<usize>()) {
            let linker = linker();
            let mut entries = build_chain(&linker, n);
            let k = k_seed % n;
            entries[k].content_hash = flip_first_hex_digit(&entries[k].content_hash);

            let brk = verify_entries(&entries, &linker).unwrap_err();
            prop_assert_eq!(brk.entry.index, k);
            prop_assert_eq!(brk.kind, BreakKind::BlockHashMismatch);
        }
    }
}
