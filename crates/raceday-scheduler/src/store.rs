//! SQLite-backed task store with claim-based mutual exclusion.
//!
//! The scheduler_tasks table is the sole source of truth for what runs and
//! when. Every mutation that grants execution rights is a guarded
//! conditional UPDATE (affected-rows check), so two scheduler processes
//! sharing the file cannot both win a claim. Execution records are
//! append-only.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use raceday_core::error::{RacedayError, Result};

use crate::tasks::{
    ExecOutcome, ExecutionRecord, RunStatus, Schedule, TaskConfig, TaskDefinition, TaskKind,
    TaskScope, TaskSource,
};

/// Shared SELECT column list for task queries — single source of truth.
const TASK_SELECT: &str = "SELECT id,name,kind,scope,schedule_kind,schedule_data,config,source,is_active,next_run_at,last_run_at,last_run_status,last_error,created_at FROM scheduler_tasks";

/// Map a database row to a TaskDefinition.
fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<TaskDefinition> {
    let schedule_kind: String = row.get(4)?;
    let schedule_data: String = row.get(5)?;
    let data: serde_json::Value = serde_json::from_str(&schedule_data).unwrap_or_default();
    let schedule = match schedule_kind.as_str() {
        "cron" => Schedule::Cron {
            expression: data["expression"].as_str().unwrap_or("0 * * * *").to_string(),
        },
        _ => Schedule::Interval {
            every_secs: data["every_secs"].as_u64().unwrap_or(3600),
        },
    };

    let config_str: String = row.get(6)?;
    let config: TaskConfig = serde_json::from_str(&config_str).unwrap_or_default();

    Ok(TaskDefinition {
        id: row.get(0)?,
        name: row.get(1)?,
        kind: TaskKind::parse(&row.get::<_, String>(2)?),
        scope: TaskScope::decode(&row.get::<_, String>(3)?),
        schedule,
        config,
        source: TaskSource::parse(&row.get::<_, String>(7)?),
        is_active: row.get::<_, i32>(8)? != 0,
        next_run_at: row.get::<_, Option<String>>(9)?.as_deref().map(parse_ts),
        last_run_at: row.get::<_, Option<String>>(10)?.as_deref().map(parse_ts),
        last_run_status: RunStatus::parse(&row.get::<_, String>(11)?),
        last_error: row.get(12)?,
        created_at: parse_ts(&row.get::<_, String>(13)?),
    })
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn schedule_columns(schedule: &Schedule) -> (&'static str, String) {
    match schedule {
        Schedule::Interval { every_secs } => {
            ("interval", serde_json::json!({ "every_secs": every_secs }).to_string())
        }
        Schedule::Cron { expression } => {
            ("cron", serde_json::json!({ "expression": expression }).to_string())
        }
    }
}

/// Task store.
pub struct SchedulerDb {
    conn: Mutex<Connection>,
}

impl SchedulerDb {
    /// Open or create the scheduler database.
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
            CREATE TABLE IF NOT EXISTS scheduler_tasks (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                kind TEXT NOT NULL,
                scope TEXT NOT NULL DEFAULT 'global',
                schedule_kind TEXT NOT NULL,       -- 'interval' | 'cron'
                schedule_data TEXT NOT NULL,       -- JSON: {every_secs:..} or {expression:..}
                config TEXT NOT NULL DEFAULT '{}', -- flat option map, schema implicit per kind
                source TEXT NOT NULL,              -- 'builtin' | 'custom'
                is_active INTEGER NOT NULL DEFAULT 1,
                next_run_at TEXT,
                last_run_at TEXT,
                last_run_status TEXT NOT NULL DEFAULT 'never_run',
                last_error TEXT,
                claimed_by TEXT,
                claimed_at TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_due ON scheduler_tasks(is_active, next_run_at);

            -- Append-only audit trail, one row per tick invocation.
            CREATE TABLE IF NOT EXISTS execution_records (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                started_at TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                outcome TEXT NOT NULL,             -- 'success' | 'failure' | 'timeout'
                error TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_exec_task ON execution_records(task_id, id);
        ",
            )
            .map_err(|e| RacedayError::Store(format!("Migration error: {e}")))?;
        Ok(())
    }

    // ── Definitions ────────────────────────────────────

    /// Register a built-in definition, reconciling with persisted state:
    /// the code-defined name/kind/schedule/config win, while activation and
    /// run state (next_run_at, last_*) survive restarts.
    pub fn register_builtin(&self, def: &TaskDefinition) -> Result<()> {
        let (sk, sd) = schedule_columns(&def.schedule);
        let config = serde_json::to_string(&def.config)
            .map_err(|e| RacedayError::Store(format!("Serialize config: {e}")))?;
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO scheduler_tasks
                   (id, name, kind, scope, schedule_kind, schedule_data, config, source, is_active, next_run_at, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,'builtin',1,?8,?8)
                 ON CONFLICT(id) DO UPDATE SET
                   name=?2, kind=?3, scope=?4, schedule_kind=?5, schedule_data=?6, config=?7, source='builtin'",
                params![
                    def.id,
                    def.name,
                    def.kind.as_str(),
                    def.scope.encode(),
                    sk,
                    sd,
                    config,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| RacedayError::Store(format!("Register builtin: {e}")))?;
        Ok(())
    }

    /// Create a custom definition.
    pub fn create_custom(&self, def: &TaskDefinition) -> Result<()> {
        let (sk, sd) = schedule_columns(&def.schedule);
        let config = serde_json::to_string(&def.config)
            .map_err(|e| RacedayError::Store(format!("Serialize config: {e}")))?;
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO scheduler_tasks
                   (id, name, kind, scope, schedule_kind, schedule_data, config, source, is_active, next_run_at, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,'custom',?8,?9,?10)",
                params![
                    def.id,
                    def.name,
                    def.kind.as_str(),
                    def.scope.encode(),
                    sk,
                    sd,
                    config,
                    def.is_active as i32,
                    def.next_run_at.map(|t| t.to_rfc3339()),
                    def.created_at.to_rfc3339(),
                ],
            )
            .map_err(|e| RacedayError::Store(format!("Create task: {e}")))?;
        Ok(())
    }

    /// Update a custom definition's name/schedule/config. Built-ins are
    /// code-owned and are not updatable here. Returns `false` if nothing
    /// matched.
    pub fn update_custom(
        &self,
        id: &str,
        name: &str,
        schedule: &Schedule,
        config: &TaskConfig,
    ) -> Result<bool> {
        let (sk, sd) = schedule_columns(schedule);
        let config = serde_json::to_string(config)
            .map_err(|e| RacedayError::Store(format!("Serialize config: {e}")))?;
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE scheduler_tasks SET name=?1, schedule_kind=?2, schedule_data=?3, config=?4
                 WHERE id=?5 AND source='custom'",
                params![name, sk, sd, config, id],
            )
            .map_err(|e| RacedayError::Store(format!("Update task: {e}")))?;
        Ok(changed == 1)
    }

    /// Enable or disable any definition (built-ins included).
    pub fn set_active(&self, id: &str, active: bool) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE scheduler_tasks SET is_active=?1 WHERE id=?2",
                params![active as i32, id],
            )
            .map_err(|e| RacedayError::Store(format!("Set active: {e}")))?;
        Ok(changed == 1)
    }

    /// Delete a custom definition. Built-ins cannot be deleted.
    pub fn delete_custom(&self, id: &str) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "DELETE FROM scheduler_tasks WHERE id=?1 AND source='custom'",
                params![id],
            )
            .map_err(|e| RacedayError::Store(format!("Delete task: {e}")))?;
        Ok(changed == 1)
    }

    /// Get a definition by id.
    pub fn get_task(&self, id: &str) -> Result<Option<TaskDefinition>> {
        let conn = self.conn.lock().unwrap();
        match conn.query_row(&format!("{TASK_SELECT} WHERE id=?1"), params![id], row_to_task) {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(RacedayError::Store(format!("Get task: {e}"))),
        }
    }

    /// List all definitions.
    pub fn list_tasks(&self) -> Result<Vec<TaskDefinition>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!("{TASK_SELECT} ORDER BY created_at"))
            .map_err(|e| RacedayError::Store(format!("Prepare: {e}")))?;
        let tasks = stmt
            .query_map([], row_to_task)
            .map_err(|e| RacedayError::Store(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tasks)
    }

    // ── Claims ────────────────────────────────────

    /// Active, unclaimed definitions due at `now`.
    pub fn due_tasks(&self, now: DateTime<Utc>) -> Result<Vec<TaskDefinition>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "{TASK_SELECT} WHERE is_active=1 AND claimed_by IS NULL AND next_run_at IS NOT NULL AND next_run_at <= ?1 ORDER BY next_run_at"
            ))
            .map_err(|e| RacedayError::Store(format!("Prepare: {e}")))?;
        let tasks = stmt
            .query_map(params![now.to_rfc3339()], row_to_task)
            .map_err(|e| RacedayError::Store(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tasks)
    }

    /// Atomically claim a due definition for `owner`. Exactly one concurrent
    /// caller wins; everyone else gets `false`.
    pub fn claim(&self, id: &str, owner: &str, now: DateTime<Utc>) -> Result<bool> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE scheduler_tasks SET claimed_by=?1, claimed_at=?2
                 WHERE id=?3 AND claimed_by IS NULL AND is_active=1
                   AND next_run_at IS NOT NULL AND next_run_at <= ?4",
                params![owner, now.to_rfc3339(), id, now.to_rfc3339()],
            )
            .map_err(|e| RacedayError::Store(format!("Claim: {e}")))?;
        Ok(changed == 1)
    }

    /// Record an execution and release the claim: append the audit row,
    /// update the run-state fields, advance next_run_at.
    #[allow(clippy::too_many_arguments)]
    pub fn complete_run(
        &self,
        id: &str,
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
        outcome: ExecOutcome,
        error: Option<&str>,
        next_run_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO execution_records (task_id, started_at, finished_at, outcome, error)
             VALUES (?1,?2,?3,?4,?5)",
            params![
                id,
                started_at.to_rfc3339(),
                finished_at.to_rfc3339(),
                outcome.as_str(),
                error
            ],
        )
        .map_err(|e| RacedayError::Store(format!("Record execution: {e}")))?;

        let status = match outcome {
            ExecOutcome::Success => RunStatus::Success,
            ExecOutcome::Failure | ExecOutcome::Timeout => RunStatus::Failure,
        };
        conn.execute(
            "UPDATE scheduler_tasks
             SET last_run_at=?1, last_run_status=?2, last_error=?3, next_run_at=?4,
                 claimed_by=NULL, claimed_at=NULL
             WHERE id=?5",
            params![
                started_at.to_rfc3339(),
                status.as_str(),
                error,
                next_run_at.to_rfc3339(),
                id
            ],
        )
        .map_err(|e| RacedayError::Store(format!("Release claim: {e}")))?;
        Ok(())
    }

    /// Release claims older than `cutoff` — the owning process is assumed
    /// dead. Returns the number of released claims.
    pub fn release_stale_claims(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE scheduler_tasks SET claimed_by=NULL, claimed_at=NULL
                 WHERE claimed_by IS NOT NULL AND claimed_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .map_err(|e| RacedayError::Store(format!("Release stale: {e}")))?;
        Ok(changed)
    }

    // ── Execution records ────────────────────────────────────

    /// Recent executions for one task, newest first.
    pub fn executions(&self, task_id: &str, limit: usize) -> Result<Vec<ExecutionRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT id, task_id, started_at, finished_at, outcome, error
                 FROM execution_records WHERE task_id=?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(|e| RacedayError::Store(format!("Prepare: {e}")))?;
        let records = stmt
            .query_map(params![task_id, limit as i64], |row| {
                Ok(ExecutionRecord {
                    id: row.get(0)?,
                    task_id: row.get(1)?,
                    started_at: parse_ts(&row.get::<_, String>(2)?),
                    finished_at: parse_ts(&row.get::<_, String>(3)?),
                    outcome: ExecOutcome::parse(&row.get::<_, String>(4)?),
                    error: row.get(5)?,
                })
            })
            .map_err(|e| RacedayError::Store(format!("Query: {e}")))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(records)
    }

    /// Drop execution records older than `cutoff`, keeping the trail bounded.
    pub fn prune_executions(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "DELETE FROM execution_records WHERE finished_at < ?1",
                params![cutoff.to_rfc3339()],
            )
            .map_err(|e| RacedayError::Store(format!("Prune: {e}")))?;
        Ok(changed)
    }
}
