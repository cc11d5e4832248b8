//! Append-only persistence for ledger entries.
//!
//! # Chain scope
//!
//! Chains are **per subject**: an entry's predecessor is the latest entry for
//! the same `subject_id`, and verification walks the same set. Writers on
//! different subjects never contend; writers on one subject are serialized by
//! compare-and-append.
//!
//! # Backends
//!
//! | backend | immutability | persistence |
//! |---|---|---|
//! | [`SqliteStore`] | enforced by triggers | durable, indexed |
//! | [`FlatLogStore`] | by convention only (file is editable) | durable, portable |
//! | [`MemoryStore`] | enforced (no mutation API) | none |
//!
//! Every backend stores fully linked and signed entries, so tampering with a
//! flat log is still detected by verification, it is just not prevented.

mod flatlog;
mod memory;
mod sqlite;

pub use flatlog::{read_log, FlatLogStore, LogContents};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::LedgerError;
use crate::types::{EntryDraft, EntryFilter, LedgerEntry};
use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use verse_hash::{BlockHash, ChainLinker};

/// Which backend is behind a [`LedgerStore`]; also the `store.backend` config key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreKind {
    #[serde(rename = "sqlite")]
    Structured,
    #[serde(rename = "flatlog")]
    FlatLog,
    #[default]
    #[serde(rename = "memory")]
    Memory,
}

impl StoreKind {
    /// Whether the backend itself refuses to alter stored entries.
    pub fn enforces_immutability(&self) -> bool {
        !matches!(self, StoreKind::FlatLog)
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreKind::Structured => "sqlite",
            StoreKind::FlatLog => "flatlog",
            StoreKind::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// Append-only entry persistence.
///
/// There is deliberately no update or delete.
pub trait LedgerStore: Send + Sync {
    fn kind(&self) -> StoreKind;

    /// Link, sign and persist `draft` as the next entry of its subject.
    ///
    /// Within one critical section the store:
    /// 1. rejects a repeated (subject, event type, content hash) with
    ///    [`LedgerError::DuplicateEntry`];
    /// 2. rejects with [`LedgerError::ChainConflict`] unless the subject's tip
    ///    is still `expected_tip` ([`BlockHash::genesis`] for an empty chain);
    /// 3. assigns `created_at`, links via `linker`, and writes all-or-nothing.
    fn append(
        &self,
        draft: EntryDraft,
        expected_tip: &BlockHash,
        linker: &ChainLinker,
    ) -> Result<LedgerEntry, LedgerError>;

    /// Matching entries, ascending by `created_at`.
    fn query(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Chain tip of `subject_id`, if it has any entries.
    fn latest(&self, subject_id: &str) -> Result<Option<LedgerEntry>, LedgerError>;
}

impl<S: LedgerStore + ?Sized> LedgerStore for Arc<S> {
    fn kind(&self) -> StoreKind {
        (**self).kind()
    }

    fn append(
        &self,
        draft: EntryDraft,
        expected_tip: &BlockHash,
        linker: &ChainLinker,
    ) -> Result<LedgerEntry, LedgerError> {
        (**self).append(draft, expected_tip, linker)
    }

    fn query(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>, LedgerError> {
        (**self).query(filter)
    }

    fn latest(&self, subject_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        (**self).latest(subject_id)
    }
}

impl<S: LedgerStore + ?Sized> LedgerStore for Box<S> {
    fn kind(&self) -> StoreKind {
        (**self).kind()
    }

    fn append(
        &self,
        draft: EntryDraft,
        expected_tip: &BlockHash,
        linker: &ChainLinker,
    ) -> Result<LedgerEntry, LedgerError> {
        (**self).append(draft, expected_tip, linker)
    }

    fn query(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>, LedgerError> {
        (**self).query(filter)
    }

    fn latest(&self, subject_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        (**self).latest(subject_id)
    }
}

/// Block hash a new entry must link to.
pub fn tip_hash(tip: Option<&LedgerEntry>) -> BlockHash {
    tip.map(|entry| entry.block_hash.clone())
        .unwrap_or_else(BlockHash::genesis)
}

pub(crate) fn check_tip(
    subject_id: &str,
    expected: &BlockHash,
    tip: Option<&LedgerEntry>,
) -> Result<(), LedgerError> {
    let actual = tip_hash(tip);
    if &actual != expected {
        return Err(LedgerError::ChainConflict {
            subject_id: subject_id.to_string(),
            expected: expected.clone(),
            actual,
        });
    }
    Ok(())
}

pub(crate) fn duplicate(draft: &EntryDraft) -> LedgerError {
    LedgerError::DuplicateEntry {
        subject_id: draft.subject_id.clone(),
        event_type: draft.event_type,
        content_hash: draft.content_hash.clone(),
    }
}

/// Creation time for the next entry: `now` at microsecond precision, bumped
/// past the tip so a scope stays strictly ordered.
pub(crate) fn next_created_at(tip: Option<&LedgerEntry>, now: DateTime<Utc>) -> DateTime<Utc> {
    let now = now.trunc_subsecs(6);
    match tip {
        Some(tip) if now <= tip.created_at => tip.created_at + Duration::microseconds(1),
        _ => now,
    }
}

/// Turn a draft into a linked, signed, witnessed entry.
pub(crate) fn seal(
    draft: EntryDraft,
    tip: Option<&LedgerEntry>,
    linker: &ChainLinker,
    now: DateTime<Utc>,
) -> LedgerEntry {
    let previous_block_hash = tip_hash(tip);
    let created_at = next_created_at(tip, now);
    let block_hash = linker.link(
        &draft.content_hash,
        &previous_block_hash,
        &created_at,
        &draft.author_id,
    );
    let signature = linker.sign(&draft.content_hash, &block_hash, &created_at);
    let witnesses = linker.attest(&block_hash, &created_at);

    LedgerEntry {
        event_type: draft.event_type,
        subject_id: draft.subject_id,
        author_id: draft.author_id,
        content_hash: draft.content_hash,
        previous_block_hash,
        block_hash,
        signature,
        metadata: draft.metadata,
        witnesses,
        created_at,
    }
}

/// Stable sort; entries with equal timestamps keep insertion order.
pub(crate) fn sort_chronologically(entries: &mut [LedgerEntry]) {
    entries.sort_by_key(|entry| entry.created_at);
}
