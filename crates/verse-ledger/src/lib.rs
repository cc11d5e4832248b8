//! Append-only, hash-chained authorship ledger.
//!
//! Every content lifecycle event becomes a [`LedgerEntry`] linked to the
//! previous entry of the same subject by its block hash and signed with the
//! ledger's secret. [`Ledger`] records events, verifies chains, and issues and
//! validates [`Certificate`]s over any [`LedgerStore`] backend.
//!
//! # Example
//!
//! ```
//! use verse_ledger::{ContentEvent, EventType, Ledger, MemoryStore, RequestContext};
//! use verse_hash::{ChainLinker, SigningSecret};
//! use chrono::Utc;
//!
//! let linker = ChainLinker::new(SigningSecret::new(vec![7u8; 32]).unwrap());
//! let ledger = Ledger::new(MemoryStore::new(), linker);
//!
//! let entry = ledger
//!     .record_event(&ContentEvent {
//!         event_type: EventType::Created,
//!         subject_id: "poem:1".to_string(),
//!         author_id: "author:ana".to_string(),
//!         title: "Dawn".to_string(),
//!         body: "first light".to_string(),
//!         license: None,
//!         timestamp: Utc::now(),
//!         request_context: RequestContext::default(),
//!     })
//!     .unwrap();
//!
//! assert!(entry.previous_block_hash.is_genesis());
//! assert!(ledger.verify_chain("poem:1").unwrap().valid);
//! ```

mod certificate;
mod config;
mod error;
mod ledger;
mod store;
mod types;
mod verify;

pub use certificate::{
    Certificate, CertificateIssuer, CertificateStatus, CertificateValidation,
    CertificateValidator,
};
pub use config::{
    ChainConfig, LedgerConfig, StoreConfig, WitnessConfig, DEFAULT_BUSY_TIMEOUT_MS,
    DEFAULT_MAX_CONFLICT_RETRIES, SECRET_ENV,
};
pub use error::{ConfigError, LedgerError};
pub use ledger::Ledger;
pub use store::{
    read_log, tip_hash, FlatLogStore, LedgerStore, LogContents, MemoryStore, SqliteStore,
    StoreKind,
};
pub use types::{
    ContentEvent, EntryDraft, EntryFilter, EntryMetadata, EntrySummary, EventType, LedgerEntry,
    RequestContext,
};
pub use verify::{
    verify_chain, verify_entries, verify_witnesses, BreakKind, ChainBreak, EntryRef,
    VerificationReport, WitnessError,
};
