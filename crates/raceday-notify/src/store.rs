//! SQLite-backed notification queue.
//!
//! The notifications table is the sole source of truth. Enqueue is one cheap
//! insert; every status change is a guarded conditional UPDATE so concurrent
//! dispatcher instances cannot double-claim a row, and the retry-count
//! invariant (`retry_count <= max_retries`) holds in a single atomic
//! statement.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use raceday_core::error::{RacedayError, Result};

use crate::records::{NotificationRecord, NotifyStatus};

const NOTIFY_SELECT: &str = "SELECT id,user_id,event_type,payload,method,status,retry_count,max_retries,error,created_at,updated_at FROM notifications";

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<NotificationRecord> {
    let payload_str: String = row.get(3)?;
    Ok(NotificationRecord {
        id: row.get(0)?,
        user_id: row.get(1)?,
        event_type: row.get(2)?,
        payload: serde_json::from_str(&payload_str).unwrap_or_default(),
        method: row.get(4)?,
        status: NotifyStatus::parse(&row.get::<_, String>(5)?),
        retry_count: row.get(6)?,
        max_retries: row.get(7)?,
        error: row.get(8)?,
        created_at: parse_ts(&row.get::<_, String>(9)?),
        updated_at: parse_ts(&row.get::<_, String>(10)?),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Notification queue store.
pub struct NotifyDb {
    conn: Mutex<Connection>,
}

impl NotifyDb {
    /// Open or create the notification database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| RacedayError::Store(format!("DB open error: {e}")))?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| RacedayError::Store(format!("DB pragma error: {e}")))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// In-memory database for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| RacedayError::Store(format!("DB open error: {e}")))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS notifications (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL DEFAULT '{}',
                method TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                retry_count INTEGER NOT NULL DEFAULT 0,
                max_retries INTEGER NOT NULL DEFAULT 3,
                error TEXT,
                claimed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notify_status ON notifications(status, id);
        ",
            )
            .map_err(|e| RacedayError::Store(format!("Migration error: {e}")))?;
        Ok(())
    }

    /// Enqueue one notification. Cheap and non-blocking relative to the
    /// business operation that triggered it.
    pub fn enqueue(
        &self,
        user_id: &str,
        event_type: &str,
        method: &str,
        payload: &serde_json::Value,
        max_retries: u32,
    ) -> Result<i64> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO notifications (user_id, event_type, payload, method, max_retries, created_at, updated_at)
             VALUES (?1,?2,?3,?4,?5,?6,?6)",
            params![user_id, event_type, payload.to_string(), method, max_retries, now],
        )
        .map_err(|e| RacedayError::Store(format!("Enqueue: {e}")))?;
        Ok(conn.last_insert_rowid())
    }

    /// Records eligible for dispatch.
    pub fn due(&self) -> Result<Vec<NotificationRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "{NOTIFY_SELECT} WHERE status IN ('pending','retrying') ORDER BY id"
            ))
            .map_err(|e| RacedayError::Store(format!("Prepare: {e}")))?;
        let records = stmt
            .query_map([], row_to_record)
            .map_err(|e| RacedayError::Store(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    /// Claim a record for dispatch: pending/retrying → sending. Exactly one
    /// concurrent dispatcher wins.
    pub fn claim(&self, id: i64) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE notifications SET status='sending', claimed_at=?1, updated_at=?1
                 WHERE id=?2 AND status IN ('pending','retrying')",
                params![now, id],
            )
            .map_err(|e| RacedayError::Store(format!("Claim: {e}")))?;
        Ok(changed == 1)
    }

    /// Terminal success. Only valid from the in-flight state.
    pub fn mark_sent(&self, id: i64) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE notifications SET status='sent', error=NULL, claimed_at=NULL, updated_at=?1
                 WHERE id=?2 AND status='sending'",
                params![Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| RacedayError::Store(format!("Mark sent: {e}")))?;
        Ok(())
    }

    /// Transient failure: spend one retry, then park as retrying or, with
    /// the budget exhausted, fail terminally. One atomic statement keeps
    /// `retry_count <= max_retries` true under concurrency.
    pub fn mark_transient_failure(&self, id: i64, error: &str) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE notifications SET
                   retry_count = retry_count + 1,
                   status = CASE WHEN retry_count + 1 < max_retries THEN 'retrying' ELSE 'failed' END,
                   error = ?1, claimed_at = NULL, updated_at = ?2
                 WHERE id=?3 AND status='sending'",
                params![error, Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| RacedayError::Store(format!("Mark transient: {e}")))?;
        Ok(())
    }

    /// Permanent failure: terminal immediately, retries bypassed.
    pub fn mark_permanent_failure(&self, id: i64, error: &str) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE notifications SET status='failed', error=?1, claimed_at=NULL, updated_at=?2
                 WHERE id=?3 AND status='sending'",
                params![error, Utc::now().to_rfc3339(), id],
            )
            .map_err(|e| RacedayError::Store(format!("Mark permanent: {e}")))?;
        Ok(())
    }

    /// Requeue rows stuck in-flight since before `cutoff` — the claiming
    /// dispatcher is assumed dead. Does not consume a retry; this is the
    /// at-least-once crash-recovery path, and it may re-deliver.
    pub fn requeue_stale(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE notifications SET status='retrying', claimed_at=NULL, updated_at=?1
                 WHERE status='sending' AND claimed_at < ?2",
                params![Utc::now().to_rfc3339(), cutoff.to_rfc3339()],
            )
            .map_err(|e| RacedayError::Store(format!("Requeue stale: {e}")))?;
        Ok(changed)
    }

    /// Get one record.
    pub fn get(&self, id: i64) -> Result<Option<NotificationRecord>> {
        let conn = self.conn.lock().unwrap();
        match conn.query_row(&format!("{NOTIFY_SELECT} WHERE id=?1"), params![id], row_to_record) {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(RacedayError::Store(format!("Get record: {e}"))),
        }
    }

    /// Recent records, newest first, for the management surface.
    pub fn recent(&self, limit: usize) -> Result<Vec<NotificationRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!("{NOTIFY_SELECT} ORDER BY id DESC LIMIT ?1"))
            .map_err(|e| RacedayError::Store(format!("Prepare: {e}")))?;
        let records = stmt
            .query_map(params![limit as i64], row_to_record)
            .map_err(|e| RacedayError::Store(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }
}
