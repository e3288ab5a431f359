//! Race timeout enforcement.
//!
//! Two handlers share one sweep: guard terminal state first, compute elapsed
//! time from the phase's basis timestamp, then act past the thresholds. The
//! pending sweep warns ahead of forfeiting; the in-progress sweep only
//! forfeits. Both are idempotent — the warning is a one-shot conditional
//! claim, the forfeit a conditional transition — so re-running a sweep over
//! the same races does nothing new.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use raceday_core::error::Result;
use raceday_core::events::DomainEvent;
use raceday_core::types::{Race, RaceStatus};

use crate::registry::{TaskContext, TaskHandler, TaskOutcome};
use crate::tasks::{TaskDefinition, config_i64};

/// Counters for one sweep invocation.
#[derive(Debug, Default, Clone, Copy)]
pub struct SweepStats {
    pub checked: usize,
    pub warned: usize,
    pub forfeited: usize,
    pub failed: usize,
}

impl SweepStats {
    fn summary(&self) -> String {
        format!(
            "checked {}, warned {}, forfeited {}, failed {}",
            self.checked, self.warned, self.forfeited, self.failed
        )
    }
}

/// What one sweep enforces.
struct SweepSpec<'a> {
    /// Status the forfeit transition starts from.
    from: RaceStatus,
    /// Elapsed time past which the race is forfeited.
    threshold: Duration,
    /// Lead time before the threshold at which the one-shot warning fires.
    warning_lead: Option<Duration>,
    reason: &'a str,
}

/// Run one timeout sweep over `races`. One race failing never aborts the
/// rest of the sweep.
async fn sweep(
    ctx: &TaskContext,
    races: Vec<Race>,
    basis: fn(&Race) -> Option<DateTime<Utc>>,
    spec: SweepSpec<'_>,
) -> SweepStats {
    let now = ctx.now();
    let mut stats = SweepStats::default();

    for race in races {
        stats.checked += 1;

        // Terminal guard comes before any elapsed computation: a settled
        // race is a no-op target, not an error.
        if race.status.is_terminal() {
            continue;
        }
        let Some(since) = basis(&race) else {
            tracing::warn!("race {} has no basis timestamp for its phase, skipping", race.id);
            continue;
        };
        let elapsed = now - since;

        match enforce_one(ctx, &race, elapsed, &spec).await {
            Ok((warned, forfeited)) => {
                stats.warned += warned as usize;
                stats.forfeited += forfeited as usize;
            }
            Err(e) => {
                tracing::warn!("timeout enforcement failed for race {}: {e}", race.id);
                stats.failed += 1;
            }
        }
    }
    stats
}

async fn enforce_one(
    ctx: &TaskContext,
    race: &Race,
    elapsed: Duration,
    spec: &SweepSpec<'_>,
) -> Result<(bool, bool)> {
    let mut warned = false;
    let mut forfeited = false;

    if let Some(lead) = spec.warning_lead
        && elapsed >= spec.threshold - lead
        && race.warning_sent_at.is_none()
    {
        // The conditional claim makes the warning fire exactly once, even
        // with concurrent sweeps.
        if ctx.control.claim_warning(&race.id).await? {
            let minutes_left = (spec.threshold - elapsed).num_minutes().max(0);
            ctx.events
                .publish(DomainEvent::race_warning(race, minutes_left))
                .await;
            tracing::info!("race {} warned, {minutes_left}m until forfeit", race.id);
            warned = true;
        }
    }

    if elapsed >= spec.threshold {
        if ctx
            .control
            .try_transition(&race.id, spec.from, RaceStatus::Forfeited)
            .await?
        {
            ctx.audit
                .record("race_forfeited", &race.id, Some(spec.reason))
                .await?;
            ctx.events
                .publish(DomainEvent::race_forfeited(race, spec.reason))
                .await;
            tracing::info!("race {} forfeited: {}", race.id, spec.reason);
            forfeited = true;
        }
        // Lost transition: another process settled the race first. No-op.
    }

    Ok((warned, forfeited))
}

/// Forfeits PENDING races whose room has been open too long, with a one-time
/// advance warning. Config: `warning_minutes` (default 10), `timeout_minutes`
/// (default 20).
pub struct PendingTimeoutHandler;

#[async_trait]
impl TaskHandler for PendingTimeoutHandler {
    fn kind(&self) -> &str {
        "race-pending-timeout"
    }

    async fn run(&self, ctx: &TaskContext, task: &TaskDefinition) -> Result<TaskOutcome> {
        let warning_minutes = config_i64(&task.config, "warning_minutes", 10)?;
        let timeout_minutes = config_i64(&task.config, "timeout_minutes", 20)?;
        if warning_minutes <= 0 || timeout_minutes <= warning_minutes {
            return Err(raceday_core::error::RacedayError::Config(format!(
                "need 0 < warning_minutes < timeout_minutes, got {warning_minutes}/{timeout_minutes}"
            )));
        }

        let races = ctx.races.pending_with_open_room().await?;
        let stats = sweep(
            ctx,
            races,
            |race| Some(race.created_at),
            SweepSpec {
                from: RaceStatus::Pending,
                threshold: Duration::minutes(timeout_minutes),
                warning_lead: Some(Duration::minutes(warning_minutes)),
                reason: "entrant did not start within the pending timeout",
            },
        )
        .await;
        Ok(TaskOutcome::summary(stats.summary()))
    }
}

/// Forfeits IN_PROGRESS races that have been running too long.
/// Config: `max_hours` (default 12).
pub struct InProgressTimeoutHandler;

#[async_trait]
impl TaskHandler for InProgressTimeoutHandler {
    fn kind(&self) -> &str {
        "race-in-progress-timeout"
    }

    async fn run(&self, ctx: &TaskContext, task: &TaskDefinition) -> Result<TaskOutcome> {
        let max_hours = config_i64(&task.config, "max_hours", 12)?;
        if max_hours <= 0 {
            return Err(raceday_core::error::RacedayError::Config(format!(
                "max_hours must be positive, got {max_hours}"
            )));
        }

        let races = ctx.races.in_progress().await?;
        let stats = sweep(
            ctx,
            races,
            |race| race.started_at,
            SweepSpec {
                from: RaceStatus::InProgress,
                threshold: Duration::hours(max_hours),
                warning_lead: None,
                reason: "race exceeded the in-progress time limit",
            },
        )
        .await;
        Ok(TaskOutcome::summary(stats.summary()))
    }
}
