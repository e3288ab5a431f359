//! Domain database — SQLite schema for races, tournaments, and audit.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use raceday_core::error::{RacedayError, Result};
use raceday_core::traits::{AuditSink, RaceControl, RaceDirectory, Scorekeeper};
use raceday_core::types::{Race, RaceStatus, RaceTime, Tournament};

/// Shared SELECT column list for race queries — single source of truth.
const RACE_SELECT: &str = "SELECT id,tenant_id,entrant_id,room_ref,status,created_at,started_at,finished_at,warning_sent_at FROM races";

/// Map a database row to a Race struct.
fn row_to_race(row: &rusqlite::Row) -> rusqlite::Result<Race> {
    let status_str: String = row.get(4)?;
    Ok(Race {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        entrant_id: row.get(2)?,
        room_ref: row.get(3)?,
        status: RaceStatus::parse(&status_str).unwrap_or(RaceStatus::Cancelled),
        created_at: parse_ts(&row.get::<_, String>(5)?),
        started_at: row.get::<_, Option<String>>(6)?.as_deref().map(parse_ts),
        finished_at: row.get::<_, Option<String>>(7)?.as_deref().map(parse_ts),
        warning_sent_at: row.get::<_, Option<String>>(8)?.as_deref().map(parse_ts),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Domain database manager.
pub struct DomainDb {
    conn: Mutex<Connection>,
}

impl DomainDb {
    /// Open or create the domain database.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .map_err(|e| RacedayError::Store(format!("DB open error: {e}")))?;

        // WAL mode allows concurrent readers/writers across processes.
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

    /// Run schema migrations.
    fn migrate(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS races (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                entrant_id TEXT NOT NULL,
                room_ref TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at TEXT NOT NULL,
                started_at TEXT,
                finished_at TEXT,
                warning_sent_at TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_races_status ON races(status);

            CREATE TABLE IF NOT EXISTS tournaments (
                id TEXT PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                name TEXT NOT NULL,
                strategy TEXT NOT NULL DEFAULT 'median',
                is_active INTEGER NOT NULL DEFAULT 1
            );

            -- Completed race times per scoring unit, source of truth for
            -- recalculation.
            CREATE TABLE IF NOT EXISTS race_times (
                race_id TEXT PRIMARY KEY,
                tournament_id TEXT NOT NULL,
                unit_id TEXT NOT NULL,
                seconds REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_race_times_unit ON race_times(tournament_id, unit_id);

            CREATE TABLE IF NOT EXISTS unit_pars (
                tournament_id TEXT NOT NULL,
                unit_id TEXT NOT NULL,
                par REAL NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (tournament_id, unit_id)
            );

            CREATE TABLE IF NOT EXISTS race_scores (
                race_id TEXT PRIMARY KEY,
                score INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS audit_log (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_type TEXT NOT NULL,
                subject TEXT NOT NULL,
                details TEXT,
                created_at TEXT NOT NULL
            );
        ",
            )
            .map_err(|e| RacedayError::Store(format!("Migration error: {e}")))?;
        Ok(())
    }

    // ── Races ────────────────────────────────────

    /// Insert a race (used by the wider platform and by tests).
    pub fn insert_race(&self, race: &Race) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO races (id, tenant_id, entrant_id, room_ref, status, created_at, started_at, finished_at, warning_sent_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
                params![
                    race.id,
                    race.tenant_id,
                    race.entrant_id,
                    race.room_ref,
                    race.status.as_str(),
                    race.created_at.to_rfc3339(),
                    race.started_at.map(|t| t.to_rfc3339()),
                    race.finished_at.map(|t| t.to_rfc3339()),
                    race.warning_sent_at.map(|t| t.to_rfc3339()),
                ],
            )
            .map_err(|e| RacedayError::Store(format!("Insert race: {e}")))?;
        Ok(())
    }

    /// Get a race by id.
    pub fn get_race(&self, id: &str) -> Result<Option<Race>> {
        let conn = self.conn.lock().unwrap();
        match conn.query_row(&format!("{RACE_SELECT} WHERE id=?1"), params![id], row_to_race) {
            Ok(r) => Ok(Some(r)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(RacedayError::Store(format!("Get race: {e}"))),
        }
    }

    fn list_races(&self, where_clause: &str) -> Result<Vec<Race>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!("{RACE_SELECT} {where_clause} ORDER BY created_at"))
            .map_err(|e| RacedayError::Store(format!("Prepare: {e}")))?;
        let races = stmt
            .query_map([], row_to_race)
            .map_err(|e| RacedayError::Store(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(races)
    }

    /// Conditional status transition. Returns `false` when the race is no
    /// longer in `from` — the caller's no-op signal.
    pub fn transition_race(&self, race_id: &str, from: RaceStatus, to: RaceStatus) -> Result<bool> {
        let now = Utc::now().to_rfc3339();
        let conn = self.conn.lock().unwrap();
        let changed = if to.is_terminal() {
            conn.execute(
                "UPDATE races SET status=?1, finished_at=?2 WHERE id=?3 AND status=?4",
                params![to.as_str(), now, race_id, from.as_str()],
            )
        } else if to == RaceStatus::InProgress {
            conn.execute(
                "UPDATE races SET status=?1, started_at=?2 WHERE id=?3 AND status=?4",
                params![to.as_str(), now, race_id, from.as_str()],
            )
        } else {
            conn.execute(
                "UPDATE races SET status=?1 WHERE id=?2 AND status=?3",
                params![to.as_str(), race_id, from.as_str()],
            )
        }
        .map_err(|e| RacedayError::Store(format!("Transition race: {e}")))?;
        Ok(changed == 1)
    }

    /// One-shot warning claim: sets `warning_sent_at` only if still unset.
    pub fn claim_race_warning(&self, race_id: &str) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE races SET warning_sent_at=?1 WHERE id=?2 AND warning_sent_at IS NULL",
                params![Utc::now().to_rfc3339(), race_id],
            )
            .map_err(|e| RacedayError::Store(format!("Claim warning: {e}")))?;
        Ok(changed == 1)
    }

    // ── Tournaments & scoring ────────────────────────────────────

    /// Create or update a tournament.
    pub fn upsert_tournament(&self, t: &Tournament) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO tournaments (id, tenant_id, name, strategy, is_active)
                 VALUES (?1,?2,?3,?4,?5)
                 ON CONFLICT(id) DO UPDATE SET
                   name=?3, strategy=?4, is_active=?5",
                params![t.id, t.tenant_id, t.name, t.strategy, t.is_active as i32],
            )
            .map_err(|e| RacedayError::Store(format!("Upsert tournament: {e}")))?;
        Ok(())
    }

    /// Record a completed race time for scoring.
    pub fn add_race_time(&self, tournament_id: &str, time: &RaceTime) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT OR REPLACE INTO race_times (race_id, tournament_id, unit_id, seconds)
                 VALUES (?1,?2,?3,?4)",
                params![time.race_id, tournament_id, time.unit_id, time.seconds],
            )
            .map_err(|e| RacedayError::Store(format!("Add race time: {e}")))?;
        Ok(())
    }

    /// Latest stored par for a unit.
    pub fn get_unit_par(&self, tournament_id: &str, unit_id: &str) -> Result<Option<f64>> {
        let conn = self.conn.lock().unwrap();
        match conn.query_row(
            "SELECT par FROM unit_pars WHERE tournament_id=?1 AND unit_id=?2",
            params![tournament_id, unit_id],
            |row| row.get::<_, f64>(0),
        ) {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(RacedayError::Store(format!("Get par: {e}"))),
        }
    }

    /// Latest stored score for a race.
    pub fn get_race_score(&self, race_id: &str) -> Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        match conn.query_row(
            "SELECT score FROM race_scores WHERE race_id=?1",
            params![race_id],
            |row| row.get::<_, i64>(0),
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(RacedayError::Store(format!("Get score: {e}"))),
        }
    }

    // ── Audit ────────────────────────────────────

    /// Get recent audit entries: (event_type, subject, details, created_at).
    pub fn recent_audit(&self, limit: usize) -> Result<Vec<(String, String, Option<String>, String)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT event_type, subject, details, created_at FROM audit_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(|e| RacedayError::Store(format!("Prepare: {e}")))?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })
            .map_err(|e| RacedayError::Store(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(rows)
    }
}

#[async_trait]
impl RaceDirectory for DomainDb {
    async fn pending_with_open_room(&self) -> Result<Vec<Race>> {
        self.list_races("WHERE status='pending' AND room_ref IS NOT NULL")
    }

    async fn in_progress(&self) -> Result<Vec<Race>> {
        self.list_races("WHERE status='in_progress'")
    }
}

#[async_trait]
impl RaceControl for DomainDb {
    async fn try_transition(
        &self,
        race_id: &str,
        from: RaceStatus,
        to: RaceStatus,
    ) -> Result<bool> {
        self.transition_race(race_id, from, to)
    }

    async fn claim_warning(&self, race_id: &str) -> Result<bool> {
        self.claim_race_warning(race_id)
    }
}

#[async_trait]
impl Scorekeeper for DomainDb {
    async fn active_tournaments(&self, ids: Option<&[String]>) -> Result<Vec<Tournament>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT id, tenant_id, name, strategy, is_active FROM tournaments WHERE is_active=1 ORDER BY id")
            .map_err(|e| RacedayError::Store(format!("Prepare: {e}")))?;
        let all: Vec<Tournament> = stmt
            .query_map([], |row| {
                Ok(Tournament {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    name: row.get(2)?,
                    strategy: row.get(3)?,
                    is_active: row.get::<_, i32>(4)? != 0,
                })
            })
            .map_err(|e| RacedayError::Store(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(match ids {
            Some(wanted) => all.into_iter().filter(|t| wanted.contains(&t.id)).collect(),
            None => all,
        })
    }

    async fn scoring_units(&self, tournament_id: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT DISTINCT unit_id FROM race_times WHERE tournament_id=?1 ORDER BY unit_id")
            .map_err(|e| RacedayError::Store(format!("Prepare: {e}")))?;
        let units = stmt
            .query_map(params![tournament_id], |row| row.get::<_, String>(0))
            .map_err(|e| RacedayError::Store(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(units)
    }

    async fn completed_times(&self, tournament_id: &str, unit_id: &str) -> Result<Vec<RaceTime>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare("SELECT race_id, unit_id, seconds FROM race_times WHERE tournament_id=?1 AND unit_id=?2 ORDER BY race_id")
            .map_err(|e| RacedayError::Store(format!("Prepare: {e}")))?;
        let times = stmt
            .query_map(params![tournament_id, unit_id], |row| {
                Ok(RaceTime {
                    race_id: row.get(0)?,
                    unit_id: row.get(1)?,
                    seconds: row.get(2)?,
                })
            })
            .map_err(|e| RacedayError::Store(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(times)
    }

    async fn store_unit_par(&self, tournament_id: &str, unit_id: &str, par: f64) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO unit_pars (tournament_id, unit_id, par, updated_at)
                 VALUES (?1,?2,?3,?4)
                 ON CONFLICT(tournament_id, unit_id) DO UPDATE SET par=?3, updated_at=?4",
                params![tournament_id, unit_id, par, Utc::now().to_rfc3339()],
            )
            .map_err(|e| RacedayError::Store(format!("Store par: {e}")))?;
        Ok(())
    }

    async fn store_race_score(&self, race_id: &str, score: i64) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO race_scores (race_id, score, updated_at)
                 VALUES (?1,?2,?3)
                 ON CONFLICT(race_id) DO UPDATE SET score=?2, updated_at=?3",
                params![race_id, score, Utc::now().to_rfc3339()],
            )
            .map_err(|e| RacedayError::Store(format!("Store score: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for DomainDb {
    async fn record(&self, event_type: &str, subject: &str, details: Option<&str>) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO audit_log (event_type, subject, details, created_at) VALUES (?1,?2,?3,?4)",
                params![event_type, subject, details, Utc::now().to_rfc3339()],
            )
            .map_err(|e| RacedayError::Store(format!("Audit: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn temp_db() -> DomainDb {
        DomainDb::open_in_memory().unwrap()
    }

    fn pending_race(id: &str, room: Option<&str>) -> Race {
        Race {
            id: id.into(),
            tenant_id: "t1".into(),
            entrant_id: "user-1".into(),
            room_ref: room.map(String::from),
            status: RaceStatus::Pending,
            created_at: Utc::now() - Duration::minutes(5),
            started_at: None,
            finished_at: None,
            warning_sent_at: None,
        }
    }

    #[tokio::test]
    async fn test_pending_query_requires_open_room() {
        let db = temp_db();
        db.insert_race(&pending_race("r1", Some("room-1"))).unwrap();
        db.insert_race(&pending_race("r2", None)).unwrap();

        let pending = db.pending_with_open_room().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "r1");
    }

    #[tokio::test]
    async fn test_conditional_transition() {
        let db = temp_db();
        db.insert_race(&pending_race("r1", Some("room-1"))).unwrap();

        // First forfeit wins.
        assert!(db.transition_race("r1", RaceStatus::Pending, RaceStatus::Forfeited).unwrap());
        // Second attempt is a no-op: the race left 'pending'.
        assert!(!db.transition_race("r1", RaceStatus::Pending, RaceStatus::Forfeited).unwrap());

        let race = db.get_race("r1").unwrap().unwrap();
        assert_eq!(race.status, RaceStatus::Forfeited);
        assert!(race.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_warning_claim_fires_once() {
        let db = temp_db();
        db.insert_race(&pending_race("r1", Some("room-1"))).unwrap();

        assert!(db.claim_race_warning("r1").unwrap());
        assert!(!db.claim_race_warning("r1").unwrap());

        let race = db.get_race("r1").unwrap().unwrap();
        assert!(race.warning_sent_at.is_some());
    }

    #[tokio::test]
    async fn test_tournament_filter() {
        let db = temp_db();
        for (id, active) in [("trn-a", true), ("trn-b", true), ("trn-c", false)] {
            db.upsert_tournament(&Tournament {
                id: id.into(),
                tenant_id: "t1".into(),
                name: id.to_uppercase(),
                strategy: "median".into(),
                is_active: active,
            })
            .unwrap();
        }

        let all = db.active_tournaments(None).await.unwrap();
        assert_eq!(all.len(), 2);

        let filtered = db
            .active_tournaments(Some(&["trn-b".to_string(), "trn-c".to_string()]))
            .await
            .unwrap();
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered[0].id, "trn-b");
    }

    #[tokio::test]
    async fn test_scoring_roundtrip() {
        let db = temp_db();
        for (race, unit, secs) in [("r1", "any%", 100.0), ("r2", "any%", 120.0), ("r3", "100%", 300.0)] {
            db.add_race_time(
                "trn-a",
                &RaceTime {
                    race_id: race.into(),
                    unit_id: unit.into(),
                    seconds: secs,
                },
            )
            .unwrap();
        }

        let units = db.scoring_units("trn-a").await.unwrap();
        assert_eq!(units, vec!["100%".to_string(), "any%".to_string()]);

        let times = db.completed_times("trn-a", "any%").await.unwrap();
        assert_eq!(times.len(), 2);

        db.store_unit_par("trn-a", "any%", 110.0).await.unwrap();
        db.store_unit_par("trn-a", "any%", 111.0).await.unwrap(); // upsert
        assert_eq!(db.get_unit_par("trn-a", "any%").unwrap(), Some(111.0));

        db.store_race_score("r1", 1010).await.unwrap();
        assert_eq!(db.get_race_score("r1").unwrap(), Some(1010));
    }

    #[tokio::test]
    async fn test_audit_trail() {
        let db = temp_db();
        db.record("race_forfeited", "r1", Some("pending timeout")).await.unwrap();
        db.record("race_forfeited", "r2", None).await.unwrap();

        let entries = db.recent_audit(10).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].1, "r2"); // most recent first
    }
}
