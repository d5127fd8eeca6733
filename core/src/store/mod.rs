//! SQLite persistence layer.
//!
//! RULE: Only the store talks to the database.
//! The cache calls store methods; nothing else executes SQL.

use crate::error::TriageResult;
use rusqlite::Connection;

mod audit;
mod investigation;

pub use investigation::{CacheStats, InvestigationRow};

pub struct CacheStore {
    conn: Connection,
    path: Option<String>, // None for :memory:
}

impl CacheStore {
    pub fn open(path: &str) -> TriageResult<Self> {
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL only takes on real files.
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self { conn, path: Some(path.to_string()) })
    }

    /// Open an in-memory database (used in tests and dry runs).
    pub fn in_memory() -> TriageResult<Self> {
        let conn = Connection::open(":memory:")?;
        Ok(Self { conn, path: None })
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    /// Apply all schema migrations in order. Idempotent.
    pub fn migrate(&self) -> TriageResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_investigations.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_event_log.sql"))?;
        Ok(())
    }
}
