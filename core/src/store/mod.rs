//! SQLite persistence layer.
//!
//! RULE: Only store/ talks to the database.
//! Services call store methods and never execute SQL directly.
//!
//! Every mutation is an atomic conditional update, or an insert guarded
//! by a uniqueness constraint. No method holds a write transaction across
//! statements; the only transaction here is the read in account_snapshot.

use crate::{
    error::EconResult,
    event::{EventLogEntry, LedgerEvent},
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection};
use std::time::Duration;

mod account;
mod completion;
mod request;

pub use account::AccountRow;
pub use completion::{InsertOutcome, VERTICAL_OBJECTIVE};

/// How long a statement waits on another connection's write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Store {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
}

impl Store {
    pub fn open(path: &str) -> EconResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> EconResult<Self> {
        let conn = Connection::open(":memory:")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self { conn, path: None })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based databases, this opens the same file.
    pub fn reopen(&self) -> EconResult<Self> {
        match &self.path {
            Some(p) => Self::open(p),
            None => Self::in_memory(),
        }
    }

    /// Apply all schema migrations in order.
    pub fn migrate(&self) -> EconResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        Ok(())
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, event: &LedgerEvent, at: DateTime<Utc>) -> EconResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (account_id, event_type, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.account_id(),
                event.type_name(),
                serde_json::to_string(event)?,
                fmt_ts(at),
            ],
        )?;
        Ok(())
    }

    pub fn events_for_account(&self, account_id: &str) -> EconResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, account_id, event_type, payload, created_at
             FROM event_log WHERE account_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![account_id], |row| {
                Ok(EventLogEntry {
                    id: Some(row.get(0)?),
                    account_id: row.get(1)?,
                    event_type: row.get(2)?,
                    payload: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn event_count(&self, event_type: &str) -> EconResult<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM event_log WHERE event_type = ?1",
            params![event_type],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
pub(crate) fn fmt_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

/// True when the statement failed on a PRIMARY KEY or UNIQUE constraint,
/// as opposed to any other failure (including foreign-key violations).
pub(crate) fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.code == rusqlite::ErrorCode::ConstraintViolation
                && matches!(
                    e.extended_code,
                    rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                        | rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                )
        }
        _ => false,
    }
}
