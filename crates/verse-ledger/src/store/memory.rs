//! Ephemeral in-process store.

use super::{check_tip, duplicate, seal, sort_chronologically, LedgerStore, StoreKind};
use crate::error::LedgerError;
use crate::types::{EntryDraft, EntryFilter, LedgerEntry};
use chrono::Utc;
use std::sync::RwLock;
use tracing::debug;
use verse_hash::{BlockHash, ChainLinker};

/// Entries live only as long as the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<Vec<LedgerEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize, LedgerError> {
        self.entries
            .read()
            .map(|e| e.len())
            .map_err(|_| LedgerError::poisoned("len"))
    }

    pub fn is_empty(&self) -> Result<bool, LedgerError> {
        Ok(self.len()? == 0)
    }
}

impl LedgerStore for MemoryStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Memory
    }

    fn append(
        &self,
        draft: EntryDraft,
        expected_tip: &BlockHash,
        linker: &ChainLinker,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| LedgerError::poisoned("append"))?;

        let key = draft.natural_key();
        if entries.iter().any(|e| e.natural_key() == key) {
            return Err(duplicate(&draft));
        }

        let tip = entries
            .iter()
            .rev()
            .find(|e| e.subject_id == draft.subject_id);
        check_tip(&draft.subject_id, expected_tip, tip)?;

        let entry = seal(draft, tip, linker, Utc::now());
        debug!(
            subject_id = %entry.subject_id,
            block_hash = %entry.block_hash,
            "appended entry to memory store"
        );
        entries.push(entry.clone());
        Ok(entry)
    }

    fn query(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut matched: Vec<LedgerEntry> = self
            .entries
            .read()
            .map_err(|_| LedgerError::poisoned("query"))?
            .iter()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        sort_chronologically(&mut matched);
        Ok(matched)
    }

    fn latest(&self, subject_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        let entries = self
            .entries
            .read()
            .map_err(|_| LedgerError::poisoned("latest"))?;
        Ok(entries
            .iter()
            .rev()
            .find(|e| e.subject_id == subject_id)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;
    use chrono::TimeZone;
    use std::sync::Arc;
    use std::thread;
    use verse_hash::{fingerprint, SigningSecret};

    fn linker() -> ChainLinker {
        ChainLinker::new(SigningSecret::new(vec![11u8; 32]).unwrap())
    }

    fn draft(subject: &str, body: &str) -> EntryDraft {
        let at = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        EntryDraft::new(
            EventType::Created,
            subject,
            "author:ana",
            fingerprint("t", body, "author:ana", &at),
        )
    }

    #[test]
    fn test_append_and_latest() {
        let store = MemoryStore::new();
        assert!(store.is_empty().unwrap());

        let first = store
            .append(draft("P1", "a"), &BlockHash::genesis(), &linker())
            .unwrap();
        let second = store
            .append(draft("P1", "b"), &first.block_hash, &linker())
            .unwrap();

        assert_eq!(store.len().unwrap(), 2);
        assert_eq!(store.latest("P1").unwrap(), Some(second));
        assert_eq!(store.latest("P2").unwrap(), None);
    }

    #[test]
    fn test_subjects_have_independent_chains() {
        let store = MemoryStore::new();
        store
            .append(draft("P1", "a"), &BlockHash::genesis(), &linker())
            .unwrap();
        let other = store
            .append(draft("P2", "a"), &BlockHash::genesis(), &linker())
            .unwrap();

        assert!(other.previous_block_hash.is_genesis());
    }

    #[test]
    fn test_stale_tip_rejected_without_write() {
        let store = MemoryStore::new();
        store
            .append(draft("P1", "a"), &BlockHash::genesis(), &linker())
            .unwrap();

        let result = store.append(draft("P1", "b"), &BlockHash::genesis(), &linker());
        assert!(matches!(result, Err(LedgerError::ChainConflict { .. })));
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_duplicate_rejected() {
        let store = MemoryStore::new();
        let first = store
            .append(draft("P1", "a"), &BlockHash::genesis(), &linker())
            .unwrap();

        let result = store.append(draft("P1", "a"), &first.block_hash, &linker());
        assert!(matches!(result, Err(LedgerError::DuplicateEntry { .. })));
    }

    #[test]
    fn test_poisoned_lock_is_reported() {
        let store = Arc::new(MemoryStore::new());
        let holder = Arc::clone(&store);
        let crashed = thread::spawn(move || {
            let _guard = holder.entries.write().unwrap();
            panic!("writer crashed while holding the lock");
        })
        .join();
        assert!(crashed.is_err());

        assert!(matches!(store.len(), Err(LedgerError::Unavailable { .. })));
        assert!(store.is_empty().is_err());
    }
}
