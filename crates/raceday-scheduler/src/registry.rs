//! Handler registry — the capability table from task kind to handler.
//!
//! Populated once at initialization; the engine resolves handlers through an
//! explicit map, never through string-keyed dynamic dispatch at runtime.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use raceday_core::error::Result;
use raceday_core::events::EventBus;
use raceday_core::traits::{AuditSink, RaceControl, RaceDirectory, Scorekeeper};

use crate::tasks::TaskDefinition;

/// Everything a handler may touch: the domain capability contracts and the
/// event bus. Handlers are stateless beyond this.
#[derive(Clone)]
pub struct TaskContext {
    pub races: Arc<dyn RaceDirectory>,
    pub control: Arc<dyn RaceControl>,
    pub scores: Arc<dyn Scorekeeper>,
    pub audit: Arc<dyn AuditSink>,
    pub events: Arc<EventBus>,
    fixed_now: Option<DateTime<Utc>>,
}

impl TaskContext {
    pub fn new(
        races: Arc<dyn RaceDirectory>,
        control: Arc<dyn RaceControl>,
        scores: Arc<dyn Scorekeeper>,
        audit: Arc<dyn AuditSink>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            races,
            control,
            scores,
            audit,
            events,
            fixed_now: None,
        }
    }

    /// Pin the clock. Used by tests to replay elapsed-time scenarios.
    pub fn with_now(mut self, now: DateTime<Utc>) -> Self {
        self.fixed_now = Some(now);
        self
    }

    /// The handler's notion of "now".
    pub fn now(&self) -> DateTime<Utc> {
        self.fixed_now.unwrap_or_else(Utc::now)
    }
}

/// A successful handler invocation's result, logged and discarded.
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub summary: String,
}

impl TaskOutcome {
    pub fn summary(text: impl Into<String>) -> Self {
        Self {
            summary: text.into(),
        }
    }
}

/// A task handler: a stateless function of (context, definition) → outcome.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// The task kind this handler serves.
    fn kind(&self) -> &str;

    async fn run(&self, ctx: &TaskContext, task: &TaskDefinition) -> Result<TaskOutcome>;
}

/// Kind → handler table.
#[derive(Default)]
pub struct HandlerRegistry {
    table: HashMap<String, Arc<dyn TaskHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Replacing an existing registration is allowed but
    /// logged — it usually means two components claimed the same kind.
    pub fn register(&mut self, handler: Arc<dyn TaskHandler>) {
        let kind = handler.kind().to_string();
        if self.table.insert(kind.clone(), handler).is_some() {
            tracing::warn!("handler for task kind '{kind}' was replaced");
        }
    }

    pub fn resolve(&self, kind: &str) -> Option<Arc<dyn TaskHandler>> {
        self.table.get(kind).cloned()
    }

    /// Registered kinds, for the management surface.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.table.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{Schedule, TaskKind};

    struct Nop(&'static str);

    #[async_trait]
    impl TaskHandler for Nop {
        fn kind(&self) -> &str {
            self.0
        }

        async fn run(&self, _ctx: &TaskContext, _task: &TaskDefinition) -> Result<TaskOutcome> {
            Ok(TaskOutcome::summary("nop"))
        }
    }

    #[test]
    fn test_resolve() {
        let mut reg = HandlerRegistry::new();
        reg.register(Arc::new(Nop("race-pending-timeout")));
        reg.register(Arc::new(Nop("score-recalculation")));

        assert!(reg.resolve("race-pending-timeout").is_some());
        assert!(reg.resolve("unknown-kind").is_none());
        assert_eq!(
            reg.kinds(),
            vec!["race-pending-timeout".to_string(), "score-recalculation".to_string()]
        );
    }

    #[test]
    fn test_definition_kind_matches_registration() {
        let def = TaskDefinition::builtin(
            "score-recalculation",
            "Score recalculation",
            TaskKind::ScoreRecalculation,
            Schedule::Interval { every_secs: 3600 },
        );
        let mut reg = HandlerRegistry::new();
        reg.register(Arc::new(Nop("score-recalculation")));
        assert!(reg.resolve(def.kind.as_str()).is_some());
    }
}
