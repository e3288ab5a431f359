//! Score recalculation.
//!
//! For every active tournament (or a configured id subset), recompute each
//! scoring unit's par from its completed race times, then re-derive every
//! race's score from the fresh par. Always from source data, never
//! incremental — re-running over unchanged input converges to identical
//! values. The aggregation and the score formula are tournament-specific and
//! live behind `ScoringStrategy`; the shipped formulas are placeholders
//! selected by name, not the one true answer.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use raceday_core::error::{RacedayError, Result};
use raceday_core::events::{DomainEvent, SCORES_RECALCULATED};
use raceday_core::types::Tournament;

use crate::registry::{TaskContext, TaskHandler, TaskOutcome};
use crate::tasks::{TaskDefinition, config_str_list};

/// A par aggregation + score formula pair, swappable per tournament.
pub trait ScoringStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reference par for a unit from its completed times. `None` when the
    /// unit has nothing to aggregate.
    fn par(&self, times: &[f64]) -> Option<f64>;

    /// Derived score for one race given its elapsed time and the unit par.
    fn score(&self, elapsed_secs: f64, par: f64) -> i64;
}

/// Shared placeholder formula: faster than par scores above 1000, capped at
/// double.
fn par_ratio_score(elapsed_secs: f64, par: f64) -> i64 {
    if elapsed_secs <= 0.0 || par <= 0.0 {
        return 0;
    }
    (1000.0 * par / elapsed_secs).round().clamp(0.0, 2000.0) as i64
}

/// Median of the completed times.
pub struct MedianPar;

impl ScoringStrategy for MedianPar {
    fn name(&self) -> &'static str {
        "median"
    }

    fn par(&self, times: &[f64]) -> Option<f64> {
        if times.is_empty() {
            return None;
        }
        let mut sorted = times.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let mid = sorted.len() / 2;
        Some(if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        })
    }

    fn score(&self, elapsed_secs: f64, par: f64) -> i64 {
        par_ratio_score(elapsed_secs, par)
    }
}

/// Mean of the completed times with a fraction trimmed off both ends.
pub struct TrimmedMeanPar {
    /// Fraction trimmed from each end (0.1 = drop fastest/slowest 10%).
    pub trim: f64,
}

impl Default for TrimmedMeanPar {
    fn default() -> Self {
        Self { trim: 0.1 }
    }
}

impl ScoringStrategy for TrimmedMeanPar {
    fn name(&self) -> &'static str {
        "trimmed-mean"
    }

    fn par(&self, times: &[f64]) -> Option<f64> {
        if times.is_empty() {
            return None;
        }
        let mut sorted = times.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        let cut = ((sorted.len() as f64) * self.trim).floor() as usize;
        // Tiny units (or an over-eager trim) degrade to a plain mean.
        let window = if cut * 2 >= sorted.len() {
            &sorted[..]
        } else {
            &sorted[cut..sorted.len() - cut]
        };
        Some(window.iter().sum::<f64>() / window.len() as f64)
    }

    fn score(&self, elapsed_secs: f64, par: f64) -> i64 {
        par_ratio_score(elapsed_secs, par)
    }
}

/// Name → strategy table with a default, fixed at startup.
pub struct StrategyTable {
    table: HashMap<&'static str, Arc<dyn ScoringStrategy>>,
    default: Arc<dyn ScoringStrategy>,
}

impl StrategyTable {
    /// The shipped strategies, with median as the default.
    pub fn standard() -> Self {
        let default: Arc<dyn ScoringStrategy> = Arc::new(MedianPar);
        let mut table: HashMap<&'static str, Arc<dyn ScoringStrategy>> = HashMap::new();
        table.insert(default.name(), default.clone());
        let trimmed: Arc<dyn ScoringStrategy> = Arc::new(TrimmedMeanPar::default());
        table.insert(trimmed.name(), trimmed);
        Self { table, default }
    }

    pub fn register(&mut self, strategy: Arc<dyn ScoringStrategy>) {
        self.table.insert(strategy.name(), strategy);
    }

    /// Resolve a tournament's strategy name, falling back to the default so
    /// an unknown name degrades instead of failing the tournament.
    pub fn resolve(&self, name: &str) -> Arc<dyn ScoringStrategy> {
        match self.table.get(name) {
            Some(s) => s.clone(),
            None => {
                tracing::debug!("unknown scoring strategy '{name}', using '{}'", self.default.name());
                self.default.clone()
            }
        }
    }
}

/// The score-recalculation task handler.
/// Config: `tournament_ids` (optional string array; absent = all active).
pub struct ScoreRecalculationHandler {
    strategies: StrategyTable,
}

impl ScoreRecalculationHandler {
    pub fn new(strategies: StrategyTable) -> Self {
        Self { strategies }
    }

    /// Recalculate one tournament. Returns (units recomputed, races scored).
    async fn recalc_tournament(
        &self,
        ctx: &TaskContext,
        tournament: &Tournament,
    ) -> Result<(usize, usize)> {
        let strategy = self.strategies.resolve(&tournament.strategy);
        let mut units = 0;
        let mut scored = 0;

        for unit_id in ctx.scores.scoring_units(&tournament.id).await? {
            let times = ctx.scores.completed_times(&tournament.id, &unit_id).await?;
            let values: Vec<f64> = times.iter().map(|t| t.seconds).collect();
            let Some(par) = strategy.par(&values) else {
                continue;
            };
            ctx.scores.store_unit_par(&tournament.id, &unit_id, par).await?;
            units += 1;

            for time in &times {
                ctx.scores
                    .store_race_score(&time.race_id, strategy.score(time.seconds, par))
                    .await?;
                scored += 1;
            }
        }
        Ok((units, scored))
    }
}

#[async_trait]
impl TaskHandler for ScoreRecalculationHandler {
    fn kind(&self) -> &str {
        "score-recalculation"
    }

    async fn run(&self, ctx: &TaskContext, task: &TaskDefinition) -> Result<TaskOutcome> {
        let ids = config_str_list(&task.config, "tournament_ids")?;
        let tournaments = ctx.scores.active_tournaments(ids.as_deref()).await?;

        let mut units = 0;
        let mut scored = 0;
        let mut failed = 0;
        for tournament in &tournaments {
            // One tournament's failure never blocks its siblings.
            match self.recalc_tournament(ctx, tournament).await {
                Ok((u, s)) => {
                    units += u;
                    scored += s;
                    ctx.events
                        .publish(DomainEvent::new(
                            SCORES_RECALCULATED,
                            &tournament.tenant_id,
                            serde_json::json!({
                                "tournament_id": tournament.id,
                                "units": u,
                                "races_scored": s,
                            }),
                        ))
                        .await;
                }
                Err(e) => {
                    let err = RacedayError::Recalculation(format!("tournament {}: {e}", tournament.id));
                    tracing::warn!("{err}");
                    failed += 1;
                }
            }
        }

        Ok(TaskOutcome::summary(format!(
            "{} tournament(s), {units} unit par(s), {scored} score(s), {failed} failed",
            tournaments.len()
        )))
    }
}
