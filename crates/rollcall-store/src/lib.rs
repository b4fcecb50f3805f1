//! rollcall-store — persistence for the enrollment gallery and the
//! attendance ledger.
//!
//! One SQLite database holds three tables: `templates` (the gallery, one
//! canonical raster per identity), `people` (the roster) and `attendance`
//! (timestamped events with per-day duplicate suppression).

mod ledger;
mod templates;

pub use ledger::{AttendanceLedger, AttendanceReceipt, LedgerError, PersonRef};
pub use templates::{StoreError, TemplateStore};

use rusqlite::Connection;
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS templates (
    identity   TEXT PRIMARY KEY,
    width      INTEGER NOT NULL,
    height     INTEGER NOT NULL,
    pixels     BLOB NOT NULL,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS people (
    identity    TEXT PRIMARY KEY,
    class_ref   TEXT,
    enrolled_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS attendance (
    id          TEXT PRIMARY KEY,
    identity    TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    day         TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS attendance_identity_day
    ON attendance (identity, day);
";

/// SQLite store implementing both [`TemplateStore`] and
/// [`AttendanceLedger`]. The connection sits behind a mutex, so every
/// operation is a single serialized statement — a concurrent reader
/// never observes a half-written template.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database file and apply the schema.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        // WAL keeps readers unblocked during template writes.
        let _mode: String = conn.query_row("PRAGMA journal_mode=WAL", [], |r| r.get(0))?;
        tracing::info!(path = %path.display(), "attendance database opened");
        Self::init(conn)
    }

    /// In-memory database, used by tests and diagnostics.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub(crate) fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}
