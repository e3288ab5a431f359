//! Built-in task handlers, compiled into the process and registered at
//! startup.

pub mod race_timeout;
pub mod scoring;

use std::sync::Arc;

pub use race_timeout::{InProgressTimeoutHandler, PendingTimeoutHandler};
pub use scoring::{MedianPar, ScoreRecalculationHandler, ScoringStrategy, StrategyTable, TrimmedMeanPar};

use crate::registry::HandlerRegistry;
use crate::tasks::{Schedule, TaskDefinition, TaskKind};

/// The built-in task definitions. Reconciled into the store on every start:
/// the schedules here win, run state in the store survives.
pub fn builtin_definitions() -> Vec<TaskDefinition> {
    vec![
        TaskDefinition::builtin(
            "race-pending-timeout",
            "Race pending timeout",
            TaskKind::RacePendingTimeout,
            Schedule::Interval { every_secs: 60 },
        ),
        TaskDefinition::builtin(
            "race-in-progress-timeout",
            "Race in-progress timeout",
            TaskKind::RaceInProgressTimeout,
            Schedule::Interval { every_secs: 300 },
        ),
        TaskDefinition::builtin(
            "score-recalculation",
            "Score recalculation",
            TaskKind::ScoreRecalculation,
            Schedule::Interval { every_secs: 3600 },
        ),
    ]
}

/// Register the built-in handlers into the capability table.
pub fn register_builtins(registry: &mut HandlerRegistry) {
    registry.register(Arc::new(PendingTimeoutHandler));
    registry.register(Arc::new(InProgressTimeoutHandler));
    registry.register(Arc::new(ScoreRecalculationHandler::new(StrategyTable::standard())));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtins_have_handlers() {
        let mut registry = HandlerRegistry::new();
        register_builtins(&mut registry);
        for def in builtin_definitions() {
            assert!(
                registry.resolve(def.kind.as_str()).is_some(),
                "no handler for built-in kind {}",
                def.kind
            );
        }
    }
}
