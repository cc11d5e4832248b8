//! Ledger error taxonomy.

use crate::types::EventType;
use crate::verify::ChainBreak;
use std::path::PathBuf;
use thiserror::Error;
use verse_hash::{BlockHash, ContentHash, HashError};

/// Errors returned by ledger operations.
///
/// Only [`LedgerError::ChainConflict`] is ever retried inside the ledger; every
/// other variant reaches the caller unchanged.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The natural key (subject, event type, content hash) is already recorded.
    #[error("{event_type} for {subject_id} with content {content_hash} is already recorded")]
    DuplicateEntry {
        subject_id: String,
        event_type: EventType,
        content_hash: ContentHash,
    },

    /// Another writer advanced the chain tip after it was read.
    #[error("chain tip for {subject_id} moved: expected {expected}, found {actual}")]
    ChainConflict {
        subject_id: String,
        expected: BlockHash,
        actual: BlockHash,
    },

    /// Verification found a broken link or a doctored entry.
    #[error("chain for {subject_id} is invalid{}", describe_break(.broken_at))]
    InvalidChain {
        subject_id: String,
        broken_at: Option<ChainBreak>,
    },

    /// The backing store could not complete the operation.
    #[error("ledger store unavailable during {operation}: {reason}")]
    Unavailable {
        operation: &'static str,
        reason: String,
    },

    /// A certificate could not be parsed or is structurally invalid.
    #[error("malformed certificate: {0}")]
    MalformedCertificate(String),

    /// A committed flat-log line is unreadable and is followed by more data.
    #[error("ledger log {} is corrupt at line {line}", path.display())]
    CorruptLog { path: PathBuf, line: usize },
}

impl LedgerError {
    pub(crate) fn unavailable(operation: &'static str, reason: impl ToString) -> Self {
        LedgerError::Unavailable {
            operation,
            reason: reason.to_string(),
        }
    }

    /// Lock poisoning means a writer panicked mid-operation.
    pub(crate) fn poisoned(operation: &'static str) -> Self {
        Self::unavailable(operation, "store lock poisoned")
    }
}

fn describe_break(broken_at: &Option<ChainBreak>) -> String {
    match broken_at {
        Some(b) => format!(
            ": {} at entry {} ({})",
            b.kind, b.entry.index, b.entry.block_hash
        ),
        None => ": nothing to certify".to_string(),
    }
}

/// Errors raised while loading configuration or building a ledger from it.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("no signing secret configured (set chain.secret_hex or {env})")]
    MissingSecret { env: &'static str },

    #[error("invalid {what}: {source}")]
    Key {
        what: String,
        #[source]
        source: HashError,
    },

    #[error("store backend {backend} needs a path")]
    MissingStorePath { backend: &'static str },

    #[error(transparent)]
    Store(#[from] LedgerError),
}
