//! Attendance ledger: roster entries and timestamped attendance events
//! with per-day duplicate suppression.

use crate::SqliteStore;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("attendance ledger: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("ledger mutex poisoned")]
    Poisoned,
}

/// A roster entry for an enrolled identity.
#[derive(Debug, Clone)]
pub struct PersonRef {
    pub identity: String,
    pub class_ref: Option<String>,
    pub enrolled_at: DateTime<Utc>,
}

/// Receipt for a recorded (or suppressed) attendance event.
#[derive(Debug, Clone)]
pub struct AttendanceReceipt {
    pub event_id: String,
    /// True when an event for this identity already existed today and
    /// no new row was written.
    pub deduped: bool,
}

/// Collaborator interface the recognition pipeline hands accepted
/// identities to. Duplicate-suppression policy: one event per identity
/// per calendar day.
pub trait AttendanceLedger {
    fn record_enrollment(
        &self,
        identity: &str,
        class_ref: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError>;

    fn record_attendance(
        &self,
        identity: &str,
        at: DateTime<Utc>,
    ) -> Result<AttendanceReceipt, LedgerError>;

    fn lookup_identity(&self, identity: &str) -> Result<Option<PersonRef>, LedgerError>;
}

impl AttendanceLedger for SqliteStore {
    fn record_enrollment(
        &self,
        identity: &str,
        class_ref: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<(), LedgerError> {
        let conn = self.lock().map_err(|_| LedgerError::Poisoned)?;
        conn.execute(
            "INSERT INTO people (identity, class_ref, enrolled_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(identity) DO UPDATE SET
                 class_ref = excluded.class_ref,
                 enrolled_at = excluded.enrolled_at",
            params![identity, class_ref, at.to_rfc3339()],
        )?;
        tracing::debug!(identity, class_ref, "roster entry recorded");
        Ok(())
    }

    fn record_attendance(
        &self,
        identity: &str,
        at: DateTime<Utc>,
    ) -> Result<AttendanceReceipt, LedgerError> {
        let conn = self.lock().map_err(|_| LedgerError::Poisoned)?;
        let day = at.format("%Y-%m-%d").to_string();
        let event_id = Uuid::new_v4().to_string();

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO attendance (id, identity, recorded_at, day)
             VALUES (?1, ?2, ?3, ?4)",
            params![event_id, identity, at.to_rfc3339(), day],
        )?;

        if inserted == 0 {
            // Unique (identity, day) index hit: today's event already exists.
            let existing: String = conn.query_row(
                "SELECT id FROM attendance WHERE identity = ?1 AND day = ?2",
                params![identity, day],
                |r| r.get(0),
            )?;
            tracing::info!(identity, day, "attendance already recorded, suppressed");
            return Ok(AttendanceReceipt { event_id: existing, deduped: true });
        }

        tracing::info!(identity, day, event_id, "attendance recorded");
        Ok(AttendanceReceipt { event_id, deduped: false })
    }

    fn lookup_identity(&self, identity: &str) -> Result<Option<PersonRef>, LedgerError> {
        let conn = self.lock().map_err(|_| LedgerError::Poisoned)?;
        let row = conn
            .query_row(
                "SELECT class_ref, enrolled_at FROM people WHERE identity = ?1",
                params![identity],
                |r| Ok((r.get::<_, Option<String>>(0)?, r.get::<_, String>(1)?)),
            )
            .optional()?;

        Ok(row.map(|(class_ref, enrolled_at)| PersonRef {
            identity: identity.to_string(),
            class_ref,
            enrolled_at: DateTime::parse_from_rfc3339(&enrolled_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, day, hour, 30, 0).unwrap()
    }

    #[test]
    fn test_attendance_deduped_within_a_day() {
        let store = SqliteStore::open_in_memory().unwrap();

        let first = store.record_attendance("alice", at(9, 8)).unwrap();
        assert!(!first.deduped);

        let second = store.record_attendance("alice", at(9, 14)).unwrap();
        assert!(second.deduped);
        assert_eq!(second.event_id, first.event_id);
    }

    #[test]
    fn test_attendance_new_day_new_event() {
        let store = SqliteStore::open_in_memory().unwrap();
        let monday = store.record_attendance("alice", at(9, 8)).unwrap();
        let tuesday = store.record_attendance("alice", at(10, 8)).unwrap();
        assert!(!tuesday.deduped);
        assert_ne!(monday.event_id, tuesday.event_id);
    }

    #[test]
    fn test_attendance_identities_independent() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.record_attendance("alice", at(9, 8)).unwrap();
        let bob = store.record_attendance("bob", at(9, 8)).unwrap();
        assert!(!bob.deduped);
    }

    #[test]
    fn test_roster_round_trip_and_overwrite() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(store.lookup_identity("alice").unwrap().is_none());

        store.record_enrollment("alice", Some("math-101"), at(9, 8)).unwrap();
        let person = store.lookup_identity("alice").unwrap().unwrap();
        assert_eq!(person.class_ref.as_deref(), Some("math-101"));

        store.record_enrollment("alice", Some("cs-204"), at(10, 8)).unwrap();
        let person = store.lookup_identity("alice").unwrap().unwrap();
        assert_eq!(person.class_ref.as_deref(), Some("cs-204"));
    }
}
