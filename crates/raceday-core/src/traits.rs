//! Capability contracts the engine consumes from the rest of the platform.
//!
//! The engine never touches domain storage directly — it goes through these
//! narrow traits. `raceday-domain` ships the SQLite reference implementation;
//! tests substitute in-memory fakes.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Race, RaceStatus, RaceTime, Tournament};

/// Read access to races.
#[async_trait]
pub trait RaceDirectory: Send + Sync {
    /// All PENDING races that still have an open coordination reference.
    async fn pending_with_open_room(&self) -> Result<Vec<Race>>;

    /// All IN_PROGRESS races.
    async fn in_progress(&self) -> Result<Vec<Race>>;
}

/// Guarded mutations on races. Every mutation is a conditional update so the
/// engine stays correct when more than one scheduler process runs.
#[async_trait]
pub trait RaceControl: Send + Sync {
    /// Transition `race_id` from `from` to `to`. Returns `false` when the
    /// race is no longer in `from` (already terminal, raced by another
    /// process) — callers treat that as a silent no-op.
    async fn try_transition(&self, race_id: &str, from: RaceStatus, to: RaceStatus)
    -> Result<bool>;

    /// Set `warning_sent_at` if it is still unset. Returns `true` exactly
    /// once per race; the caller that wins sends the warning.
    async fn claim_warning(&self, race_id: &str) -> Result<bool>;
}

/// Read/write access for score recalculation.
#[async_trait]
pub trait Scorekeeper: Send + Sync {
    /// Active tournaments, optionally restricted to an id set.
    async fn active_tournaments(&self, ids: Option<&[String]>) -> Result<Vec<Tournament>>;

    /// Scoring units that have at least one completed race in a tournament.
    async fn scoring_units(&self, tournament_id: &str) -> Result<Vec<String>>;

    /// Completed race times for one scoring unit.
    async fn completed_times(&self, tournament_id: &str, unit_id: &str) -> Result<Vec<RaceTime>>;

    /// Persist the recomputed par for a unit.
    async fn store_unit_par(&self, tournament_id: &str, unit_id: &str, par: f64) -> Result<()>;

    /// Persist the recomputed score for a race.
    async fn store_race_score(&self, race_id: &str, score: i64) -> Result<()>;
}

/// Append-only audit trail.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event_type: &str, subject: &str, details: Option<&str>) -> Result<()>;
}
