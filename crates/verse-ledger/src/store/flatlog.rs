//! Append-only JSON-lines log.
//!
//! One [`LedgerEntry`] per line, UTF-8, no header or footer. A line counts as
//! committed once its terminating newline is on disk; each append writes the
//! whole line with a single `write_all` and syncs before it becomes visible to
//! the writer's own index. Serialized entries never contain a raw newline, so
//! a crash can only leave an unterminated tail; a terminated line that does
//! not parse was edited and is never discarded.

use super::{check_tip, duplicate, seal, sort_chronologically, LedgerStore, StoreKind};
use crate::error::LedgerError;
use crate::types::{EntryDraft, EntryFilter, LedgerEntry, NaturalKey};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};
use verse_hash::{BlockHash, ChainLinker};

/// Result of parsing a log file.
#[derive(Debug, Default)]
pub struct LogContents {
    /// Committed entries in file order.
    pub entries: Vec<LedgerEntry>,
    /// Byte length covered by committed lines.
    pub committed_len: u64,
    /// Whether unterminated bytes follow the last committed line.
    pub torn_tail: bool,
}

/// Parse every committed line of the log at `path`.
///
/// A missing file is an empty log. A trailing line without its newline is
/// treated as not yet committed; any terminated line that does not parse is
/// [`LedgerError::CorruptLog`].
pub fn read_log(path: &Path) -> Result<LogContents, LedgerError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(LogContents::default()),
        Err(e) => return Err(LedgerError::unavailable("read log", e)),
    };
    parse_log(path, &bytes)
}

fn parse_log(path: &Path, bytes: &[u8]) -> Result<LogContents, LedgerError> {
    let mut contents = LogContents::default();
    let mut offset = 0usize;
    let mut line_no = 0usize;

    while offset < bytes.len() {
        line_no += 1;
        let Some(newline) = bytes[offset..].iter().position(|&b| b == b'\n') else {
            contents.torn_tail = true;
            break;
        };
        let line = &bytes[offset..offset + newline];
        let next = offset + newline + 1;

        if line.iter().all(u8::is_ascii_whitespace) {
            contents.committed_len = next as u64;
        } else {
            match serde_json::from_slice::<LedgerEntry>(line) {
                Ok(entry) => {
                    contents.entries.push(entry);
                    contents.committed_len = next as u64;
                }
                Err(_) => {
                    return Err(LedgerError::CorruptLog {
                        path: path.to_path_buf(),
                        line: line_no,
                    })
                }
            }
        }
        offset = next;
    }
    Ok(contents)
}

struct LogWriter {
    file: File,
    len: u64,
    tips: HashMap<String, LedgerEntry>,
    keys: HashSet<NaturalKey>,
}

impl LogWriter {
    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        self.file.write_all(line)?;
        self.file.sync_data()
    }
}

/// Flat append-only log file backend.
pub struct FlatLogStore {
    path: PathBuf,
    writer: Mutex<LogWriter>,
}

impl FlatLogStore {
    /// Open (or create) the log at `path`.
    ///
    /// An unterminated tail left by a crash is truncated so the next append
    /// starts on a fresh line. A corrupt committed line fails the open and
    /// leaves the file untouched.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| LedgerError::unavailable("open log", e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)
            .map_err(|e| LedgerError::unavailable("open log", e))?;

        let contents = read_log(&path)?;
        let file_len = file
            .metadata()
            .map_err(|e| LedgerError::unavailable("open log", e))?
            .len();
        if contents.committed_len < file_len {
            warn!(
                path = %path.display(),
                committed = contents.committed_len,
                discarded = file_len - contents.committed_len,
                "truncating uncommitted tail of ledger log"
            );
            file.set_len(contents.committed_len)
                .map_err(|e| LedgerError::unavailable("open log", e))?;
        }

        let mut tips = HashMap::new();
        let mut keys = HashSet::new();
        for entry in contents.entries {
            keys.insert(entry.natural_key());
            tips.insert(entry.subject_id.clone(), entry);
        }

        debug!(path = %path.display(), subjects = tips.len(), "opened ledger log");
        Ok(Self {
            path,
            writer: Mutex::new(LogWriter {
                file,
                len: contents.committed_len,
                tips,
                keys,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LedgerStore for FlatLogStore {
    fn kind(&self) -> StoreKind {
        StoreKind::FlatLog
    }

    fn append(
        &self,
        draft: EntryDraft,
        expected_tip: &BlockHash,
        linker: &ChainLinker,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| LedgerError::poisoned("append"))?;

        if writer.keys.contains(&draft.natural_key()) {
            return Err(duplicate(&draft));
        }
        let tip = writer.tips.get(&draft.subject_id);
        check_tip(&draft.subject_id, expected_tip, tip)?;

        let entry = seal(draft, tip, linker, Utc::now());
        let mut line =
            serde_json::to_vec(&entry).map_err(|e| LedgerError::unavailable("append", e))?;
        line.push(b'\n');

        if let Err(err) = writer.write_line(&line) {
            // Drop whatever part of the line reached the file.
            let committed = writer.len;
            if let Err(rollback) = writer.file.set_len(committed) {
                warn!(error = %rollback, "failed to roll back partial ledger line");
            }
            return Err(LedgerError::unavailable("append", err));
        }

        writer.len += line.len() as u64;
        writer.keys.insert(entry.natural_key());
        writer.tips.insert(entry.subject_id.clone(), entry.clone());
        Ok(entry)
    }

    fn query(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut matched: Vec<LedgerEntry> = read_log(&self.path)?
            .entries
            .into_iter()
            .filter(|e| filter.matches(e))
            .collect();
        sort_chronologically(&mut matched);
        Ok(matched)
    }

    fn latest(&self, subject_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(read_log(&self.path)?
            .entries
            .into_iter()
            .rev()
            .find(|e| e.subject_id == subject_id))
    }
}
