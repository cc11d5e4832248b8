//! Durable, indexed `SQLite` store.
//!
//! Uniqueness on the natural key, on `block_hash`, and on
//! `(subject_id, previous_block_hash)` backs up the in-transaction checks, and
//! triggers abort any `UPDATE` or `DELETE` on `ledger_entries`.

use super::{check_tip, duplicate, seal, LedgerStore, StoreKind};
use crate::error::LedgerError;
use crate::types::{EntryDraft, EntryFilter, LedgerEntry};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{
    params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior,
};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info};
use verse_hash::{canonical_timestamp, BlockHash, ChainLinker};

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

const ENTRY_COLUMNS: &str = "event_type, subject_id, author_id, content_hash, \
     previous_block_hash, block_hash, signature, metadata, witnesses, created_at";

/// Ledger entries in a `SQLite` database.
///
/// File databases get a second, read-only connection so queries do not wait
/// on the writer's mutex.
#[derive(Debug)]
pub struct SqliteStore {
    writer: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
    path: Option<PathBuf>,
}

impl SqliteStore {
    /// Open or create a ledger database at `path`.
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let writer = Connection::open(path).map_err(db_error("open database"))?;
        writer
            .busy_timeout(busy_timeout)
            .map_err(db_error("open database"))?;
        writer
            .execute_batch(SCHEMA_SQL)
            .map_err(db_error("initialize schema"))?;

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(db_error("open reader"))?;
        reader
            .busy_timeout(busy_timeout)
            .map_err(db_error("open reader"))?;

        info!(path = %path.display(), "opened sqlite ledger");
        Ok(Self {
            writer: Mutex::new(writer),
            reader: Some(Mutex::new(reader)),
            path: Some(path.to_path_buf()),
        })
    }

    /// Creates an in-memory database for testing.
    pub fn in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory().map_err(db_error("open database"))?;
        conn.execute_batch(SCHEMA_SQL)
            .map_err(db_error("initialize schema"))?;
        Ok(Self {
            writer: Mutex::new(conn),
            reader: None,
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn with_reader<T>(
        &self,
        operation: &'static str,
        f: impl FnOnce(&Connection) -> rusqlite::Result<T>,
    ) -> Result<T, LedgerError> {
        let conn = self
            .reader
            .as_ref()
            .unwrap_or(&self.writer)
            .lock()
            .map_err(|_| LedgerError::poisoned(operation))?;
        f(&conn).map_err(db_error(operation))
    }
}

impl LedgerStore for SqliteStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Structured
    }

    fn append(
        &self,
        draft: EntryDraft,
        expected_tip: &BlockHash,
        linker: &ChainLinker,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut conn = self
            .writer
            .lock()
            .map_err(|_| LedgerError::poisoned("append"))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(db_error("append"))?;

        let exists: bool = tx
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM ledger_entries
                 WHERE subject_id = ?1 AND event_type = ?2 AND content_hash = ?3)",
                params![
                    draft.subject_id,
                    draft.event_type.as_str(),
                    draft.content_hash.as_str()
                ],
                |row| row.get(0),
            )
            .map_err(db_error("append"))?;
        if exists {
            return Err(duplicate(&draft));
        }

        let tip = latest_entry(&tx, &draft.subject_id).map_err(db_error("append"))?;
        check_tip(&draft.subject_id, expected_tip, tip.as_ref())?;

        let entry = seal(draft, tip.as_ref(), linker, Utc::now());
        let metadata =
            serde_json::to_string(&entry.metadata).map_err(|e| LedgerError::unavailable("append", e))?;
        let witnesses = serde_json::to_string(&entry.witnesses)
            .map_err(|e| LedgerError::unavailable("append", e))?;

        tx.execute(
            &format!(
                "INSERT INTO ledger_entries ({ENTRY_COLUMNS})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
            ),
            params![
                entry.event_type.as_str(),
                entry.subject_id,
                entry.author_id,
                entry.content_hash.as_str(),
                entry.previous_block_hash.as_str(),
                entry.block_hash.as_str(),
                entry.signature,
                metadata,
                witnesses,
                canonical_timestamp(&entry.created_at),
            ],
        )
        .map_err(db_error("append"))?;
        tx.commit().map_err(db_error("append"))?;

        debug!(
            subject_id = %entry.subject_id,
            block_hash = %entry.block_hash,
            "persisted ledger entry"
        );
        Ok(entry)
    }

    fn query(&self, filter: &EntryFilter) -> Result<Vec<LedgerEntry>, LedgerError> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<String> = Vec::new();
        if let Some(subject_id) = &filter.subject_id {
            values.push(subject_id.clone());
            clauses.push(format!("subject_id = ?{}", values.len()));
        }
        if let Some(author_id) = &filter.author_id {
            values.push(author_id.clone());
            clauses.push(format!("author_id = ?{}", values.len()));
        }
        if let Some(event_type) = filter.event_type {
            values.push(event_type.as_str().to_string());
            clauses.push(format!("event_type = ?{}", values.len()));
        }

        let mut sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY created_at ASC, seq ASC");

        self.with_reader("query", |conn| {
            let mut stmt = conn.prepare(&sql)?;
            let entries = stmt
                .query_map(params_from_iter(values.iter()), row_to_entry)?
                .collect::<rusqlite::Result<Vec<_>>>();
            entries
        })
    }

    fn latest(&self, subject_id: &str) -> Result<Option<LedgerEntry>, LedgerError> {
        self.with_reader("latest", |conn| latest_entry(conn, subject_id))
    }
}

fn latest_entry(conn: &Connection, subject_id: &str) -> rusqlite::Result<Option<LedgerEntry>> {
    conn.query_row(
        &format!(
            "SELECT {ENTRY_COLUMNS} FROM ledger_entries
             WHERE subject_id = ?1 ORDER BY created_at DESC, seq DESC LIMIT 1"
        ),
        params![subject_id],
        row_to_entry,
    )
    .optional()
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let event_type: String = row.get(0)?;
    let metadata: String = row.get(7)?;
    let witnesses: String = row.get(8)?;
    let created_at: String = row.get(9)?;

    Ok(LedgerEntry {
        event_type: event_type.parse().map_err(|e: String| conversion(0, e))?,
        subject_id: row.get(1)?,
        author_id: row.get(2)?,
        content_hash: row.get::<_, String>(3)?.into(),
        previous_block_hash: row.get::<_, String>(4)?.into(),
        block_hash: row.get::<_, String>(5)?.into(),
        signature: row.get(6)?,
        metadata: serde_json::from_str(&metadata).map_err(|e| conversion(7, e))?,
        witnesses: serde_json::from_str(&witnesses).map_err(|e| conversion(8, e))?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map_err(|e| conversion(9, e))?
            .with_timezone(&Utc),
    })
}

fn conversion(
    column: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, Type::Text, err.into())
}

fn db_error(operation: &'static str) -> impl Fn(rusqlite::Error) -> LedgerError {
    move |e| LedgerError::unavailable(operation, e)
}
