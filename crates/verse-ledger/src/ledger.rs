//! The ledger facade used by content workflows.

use crate::certificate::{
    Certificate, CertificateIssuer, CertificateValidation, CertificateValidator,
};
use crate::config::{LedgerConfig, DEFAULT_MAX_CONFLICT_RETRIES};
use crate::error::{ConfigError, LedgerError};
use crate::store::{tip_hash, LedgerStore};
use crate::types::{ContentEvent, EntryDraft, EntryFilter, EntrySummary, LedgerEntry};
use crate::verify::{self, VerificationReport};
use tracing::{debug, info, warn};
use verse_hash::{fingerprint, ChainLinker, ContentHash};

/// Records content events and answers proof requests.
///
/// `Ledger` is `Send + Sync`; share it behind an `Arc`.
pub struct Ledger {
    store: Box<dyn LedgerStore>,
    linker: ChainLinker,
    max_conflict_retries: u32,
}

impl Ledger {
    pub fn new(store: impl LedgerStore + 'static, linker: ChainLinker) -> Self {
        Self {
            store: Box::new(store),
            linker,
            max_conflict_retries: DEFAULT_MAX_CONFLICT_RETRIES,
        }
    }

    pub fn with_max_conflict_retries(mut self, retries: u32) -> Self {
        self.max_conflict_retries = retries;
        self
    }

    /// Open the configured store and build the linker from `config`.
    pub fn from_config(config: &LedgerConfig) -> Result<Self, ConfigError> {
        let linker = config.linker()?;
        let store = config.open_store()?;
        Ok(Self::new(store, linker).with_max_conflict_retries(config.chain.max_conflict_retries))
    }

    pub fn store(&self) -> &dyn LedgerStore {
        self.store.as_ref()
    }

    pub fn linker(&self) -> &ChainLinker {
        &self.linker
    }

    /// Fingerprint `event` and append it to its subject's chain.
    ///
    /// A `ChainConflict` is retried against a freshly read tip up to
    /// `max_conflict_retries` times; every other error is returned as is.
    pub fn record_event(&self, event: &ContentEvent) -> Result<LedgerEntry, LedgerError> {
        let content_hash = fingerprint(
            &event.title,
            &event.body,
            &event.author_id,
            &event.timestamp,
        );

        let mut attempt = 0;
        loop {
            let tip = self.store.latest(&event.subject_id)?;
            let expected = tip_hash(tip.as_ref());
            debug!(subject_id = %event.subject_id, tip = %expected, attempt, "read chain tip");

            let draft = build_draft(event, content_hash.clone(), tip.as_ref());
            match self.store.append(draft, &expected, &self.linker) {
                Ok(entry) => {
                    info!(
                        subject_id = %entry.subject_id,
                        event_type = %entry.event_type,
                        block_hash = %entry.block_hash,
                        "recorded ledger event"
                    );
                    return Ok(entry);
                }
                Err(LedgerError::ChainConflict { .. }) if attempt < self.max_conflict_retries => {
                    attempt += 1;
                    debug!(subject_id = %event.subject_id, attempt, "chain tip moved, retrying");
                }
                Err(err) => {
                    warn!(
                        subject_id = %event.subject_id,
                        event_type = %event.event_type,
                        error = %err,
                        "failed to record ledger event"
                    );
                    return Err(err);
                }
            }
        }
    }

    pub fn verify_chain(&self, subject_id: &str) -> Result<VerificationReport, LedgerError> {
        verify::verify_chain(self.store(), &self.linker, subject_id)
    }

    pub fn issue_certificate(&self, subject_id: &str) -> Result<Certificate, LedgerError> {
        CertificateIssuer::new(self.store(), &self.linker).issue(subject_id)
    }

    pub fn validate_certificate(
        &self,
        certificate: &Certificate,
    ) -> Result<CertificateValidation, LedgerError> {
        CertificateValidator::new(self.store(), &self.linker).validate(certificate)
    }

    pub fn validate_certificate_json(
        &self,
        json: &str,
    ) -> Result<CertificateValidation, LedgerError> {
        CertificateValidator::new(self.store(), &self.linker).validate_json(json)
    }

    /// Full entries of a subject, oldest first.
    pub fn entries(&self, subject_id: &str) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.store.query(&EntryFilter::subject(subject_id))
    }

    /// Display summaries of a subject's history, oldest first.
    pub fn get_history(&self, subject_id: &str) -> Result<Vec<EntrySummary>, LedgerError> {
        Ok(self
            .entries(subject_id)?
            .iter()
            .map(EntrySummary::from)
            .collect())
    }
}

fn build_draft(
    event: &ContentEvent,
    content_hash: ContentHash,
    tip: Option<&LedgerEntry>,
) -> EntryDraft {
    let mut draft = EntryDraft::new(
        event.event_type,
        event.subject_id.clone(),
        event.author_id.clone(),
        content_hash,
    )
    .with_metadata("title", event.title.clone())
    .with_metadata("word_count", event.body.split_whitespace().count());

    if let Some(license) = &event.license {
        draft = draft.with_metadata("license", license.clone());
    }
    if let Some(tip) = tip {
        draft = draft.with_metadata("previous_version", tip.content_hash.as_str());
    }
    let context = &event.request_context;
    if let Some(address) = &context.client_address {
        draft = draft.with_metadata("client_address", address.clone());
    }
    if let Some(agent) = &context.client_agent {
        draft = draft.with_metadata("client_agent", agent.clone());
    }
    draft
}
