//! Ledger data structures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use verse_hash::{BlockHash, ContentHash, Witness};

/// Free-form event context stored alongside an entry.
///
/// Ordered so the serialized form is stable across backends.
pub type EntryMetadata = BTreeMap<String, serde_json::Value>;

/// Content lifecycle event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    Created,
    Updated,
    Deleted,
    Transferred,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Created => "CREATED",
            EventType::Updated => "UPDATED",
            EventType::Deleted => "DELETED",
            EventType::Transferred => "TRANSFERRED",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "CREATED" => Ok(EventType::Created),
            "UPDATED" => Ok(EventType::Updated),
            "DELETED" => Ok(EventType::Deleted),
            "TRANSFERRED" => Ok(EventType::Transferred),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

/// A single persisted entry in a subject's authorship chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    pub event_type: EventType,

    /// Content item the event concerns; also the chain scope.
    pub subject_id: String,

    /// Acting principal.
    pub author_id: String,

    /// Fingerprint of the content state at this event.
    pub content_hash: ContentHash,

    /// Block hash of the predecessor, or the genesis sentinel.
    pub previous_block_hash: BlockHash,

    pub block_hash: BlockHash,

    /// Hex HMAC over content hash, block hash and creation time.
    pub signature: String,

    #[serde(default)]
    pub metadata: EntryMetadata,

    #[serde(default)]
    pub witnesses: Vec<Witness>,

    /// Assigned by the store at append; never changes afterwards.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub(crate) fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            subject_id: self.subject_id.clone(),
            event_type: self.event_type,
            content_hash: self.content_hash.clone(),
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.metadata.get("title").and_then(|v| v.as_str())
    }
}

/// What a caller hands to the store; the store links, signs and timestamps it.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryDraft {
    pub event_type: EventType,
    pub subject_id: String,
    pub author_id: String,
    pub content_hash: ContentHash,
    pub metadata: EntryMetadata,
}

impl EntryDraft {
    pub fn new(
        event_type: EventType,
        subject_id: impl Into<String>,
        author_id: impl Into<String>,
        content_hash: ContentHash,
    ) -> Self {
        Self {
            event_type,
            subject_id: subject_id.into(),
            author_id: author_id.into(),
            content_hash,
            metadata: EntryMetadata::new(),
        }
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub(crate) fn natural_key(&self) -> NaturalKey {
        NaturalKey {
            subject_id: self.subject_id.clone(),
            event_type: self.event_type,
            content_hash: self.content_hash.clone(),
        }
    }
}

/// Idempotency key guarding against double submission.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct NaturalKey {
    pub subject_id: String,
    pub event_type: EventType,
    pub content_hash: ContentHash,
}

/// Optional constraints for [`crate::LedgerStore::query`]; empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryFilter {
    pub subject_id: Option<String>,
    pub author_id: Option<String>,
    pub event_type: Option<EventType>,
}

impl EntryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn subject(subject_id: impl Into<String>) -> Self {
        Self {
            subject_id: Some(subject_id.into()),
            ..Self::default()
        }
    }

    pub fn author(mut self, author_id: impl Into<String>) -> Self {
        self.author_id = Some(author_id.into());
        self
    }

    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        self.subject_id
            .as_deref()
            .map_or(true, |s| s == entry.subject_id)
            && self
                .author_id
                .as_deref()
                .map_or(true, |a| a == entry.author_id)
            && self.event_type.map_or(true, |t| t == entry.event_type)
    }
}

/// Where an inbound request came from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_agent: Option<String>,
}

/// A content lifecycle event as produced by the content-management side.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentEvent {
    pub event_type: EventType,
    pub subject_id: String,
    pub author_id: String,
    pub title: String,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    /// When the content state was produced; part of the fingerprint.
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub request_context: RequestContext,
}

/// Display-oriented view of one history entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EntrySummary {
    pub event_type: EventType,
    pub author_id: String,
    pub content_hash: ContentHash,
    pub previous_block_hash: BlockHash,
    pub block_hash: BlockHash,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub witness_count: usize,
}

impl From<&LedgerEntry> for EntrySummary {
    fn from(entry: &LedgerEntry) -> Self {
        EntrySummary {
            event_type: entry.event_type,
            author_id: entry.author_id.clone(),
            content_hash: entry.content_hash.clone(),
            previous_block_hash: entry.previous_block_hash.clone(),
            block_hash: entry.block_hash.clone(),
            created_at: entry.created_at,
            title: entry.title().map(str::to_string),
            witness_count: entry.witnesses.len(),
        }
    }
}
