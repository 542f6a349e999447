//! SQLite persistence: the read-only enrollment roster and the
//! attendance record sink.

use chrono::{DateTime, Utc};
use rollcall_core::tracker::AttendanceMark;
use rollcall_core::types::{EnrolledPerson, ReferenceImage, ViewAngle};
use rusqlite::Connection;
use serde::Serialize;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// One persisted attendance record.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub session_id: String,
    pub person_id: String,
    pub label: String,
    pub recorded_at: DateTime<Utc>,
}

/// SQLite-backed store. The `people` table is the enrollment roster this
/// system reads but never writes; `attendance` is the downstream sink.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open (and if necessary create) the database at the given path.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS people (
                 id          TEXT PRIMARY KEY,
                 label       TEXT NOT NULL,
                 front_image TEXT,
                 left_image  TEXT,
                 right_image TEXT
             );
             CREATE TABLE IF NOT EXISTS attendance (
                 id          TEXT PRIMARY KEY,
                 session_id  TEXT NOT NULL,
                 person_id   TEXT NOT NULL,
                 label       TEXT NOT NULL,
                 recorded_at TEXT NOT NULL
             );",
        )?;
        Ok(Self { conn })
    }

    /// Load the enrollment roster in stable id order. Missing image
    /// columns are tolerated; a person may carry zero reference images.
    pub fn load_roster(&self) -> Result<Vec<EnrolledPerson>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, label, front_image, left_image, right_image
             FROM people ORDER BY id",
        )?;

        let people = stmt
            .query_map([], |row| {
                let id: String = row.get(0)?;
                let label: String = row.get(1)?;
                let views = [
                    (ViewAngle::Front, row.get::<_, Option<String>>(2)?),
                    (ViewAngle::Left, row.get::<_, Option<String>>(3)?),
                    (ViewAngle::Right, row.get::<_, Option<String>>(4)?),
                ];

                let images = views
                    .into_iter()
                    .filter_map(|(view, location)| {
                        location.map(|location| ReferenceImage { view, location })
                    })
                    .collect();

                Ok(EnrolledPerson { id, label, images })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(people)
    }

    /// Persist one attendance record for a first-seen person.
    pub fn record_attendance(
        &mut self,
        session_id: &str,
        mark: &AttendanceMark,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO attendance (id, session_id, person_id, label, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            (
                Uuid::new_v4().to_string(),
                session_id,
                &mark.person_id,
                &mark.label,
                Utc::now().to_rfc3339(),
            ),
        )?;
        Ok(())
    }

    /// Most recent attendance records, newest first.
    pub fn recent_attendance(&self, limit: usize) -> Result<Vec<AttendanceRecord>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, session_id, person_id, label, recorded_at
             FROM attendance ORDER BY recorded_at DESC LIMIT ?1",
        )?;

        let records = stmt
            .query_map([limit as i64], |row| {
                let recorded_at: String = row.get(4)?;
                Ok(AttendanceRecord {
                    id: row.get(0)?,
                    session_id: row.get(1)?,
                    person_id: row.get(2)?,
                    label: row.get(3)?,
                    recorded_at: recorded_at
                        .parse::<DateTime<Utc>>()
                        .unwrap_or_else(|_| Utc::now()),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seed_person(
        store: &Store,
        id: &str,
        label: &str,
        front: Option<&str>,
        left: Option<&str>,
        right: Option<&str>,
    ) {
        store
            .conn
            .execute(
                "INSERT INTO people (id, label, front_image, left_image, right_image)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                (id, label, front, left, right),
            )
            .unwrap();
    }

    #[test]
    fn test_roster_tolerates_missing_images() {
        let store = Store::open_in_memory().unwrap();
        seed_person(&store, "p1", "Ana", Some("a_front.png"), None, Some("a_right.png"));
        seed_person(&store, "p2", "Bea", None, None, None);

        let roster = store.load_roster().unwrap();
        assert_eq!(roster.len(), 2);

        assert_eq!(roster[0].id, "p1");
        assert_eq!(roster[0].images.len(), 2);
        assert_eq!(roster[0].images[0].view, ViewAngle::Front);
        assert_eq!(roster[0].images[1].view, ViewAngle::Right);

        assert!(roster[1].images.is_empty());
    }

    #[test]
    fn test_roster_is_ordered_by_id() {
        let store = Store::open_in_memory().unwrap();
        seed_person(&store, "p2", "Bea", None, None, None);
        seed_person(&store, "p1", "Ana", None, None, None);

        let roster = store.load_roster().unwrap();
        assert_eq!(roster[0].id, "p1");
        assert_eq!(roster[1].id, "p2");
    }

    #[test]
    fn test_attendance_roundtrip() {
        let mut store = Store::open_in_memory().unwrap();
        let mark = AttendanceMark {
            person_id: "p1".into(),
            label: "Ana".into(),
        };

        store.record_attendance("session-1", &mark).unwrap();
        store.record_attendance("session-1", &mark).unwrap();

        let records = store.recent_attendance(10).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].person_id, "p1");
        assert_eq!(records[0].label, "Ana");
        assert_eq!(records[0].session_id, "session-1");
    }

    #[test]
    fn test_recent_attendance_respects_limit() {
        let mut store = Store::open_in_memory().unwrap();
        for i in 0..5 {
            let mark = AttendanceMark {
                person_id: format!("p{i}"),
                label: format!("Person {i}"),
            };
            store.record_attendance("session-1", &mark).unwrap();
        }
        assert_eq!(store.recent_attendance(3).unwrap().len(), 3);
    }
}
