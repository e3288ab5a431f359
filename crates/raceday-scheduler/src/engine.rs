//! Scheduler engine — the tick loop that claims and runs due tasks.
//!
//! Each tick: release stale claims, scan for due definitions, and for every
//! one we can both (a) get a worker slot for and (b) win the claim on, spawn
//! the handler invocation. The tick itself never waits on a handler; a full
//! worker pool just leaves the remaining due tasks for the next tick. A
//! handler running past the per-execution timeout is abandoned and recorded
//! as timed out. Nothing a handler does can take the loop down.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Duration, Utc};
use tokio::sync::Semaphore;

use raceday_core::config::SchedulerConfig;

use crate::registry::{HandlerRegistry, TaskContext};
use crate::store::SchedulerDb;
use crate::tasks::{ExecOutcome, TaskDefinition};

/// The scheduler engine.
pub struct SchedulerEngine {
    store: Arc<SchedulerDb>,
    registry: Arc<HandlerRegistry>,
    ctx: TaskContext,
    cfg: SchedulerConfig,
    /// Claim identity of this process instance.
    owner: String,
    running: AtomicBool,
    workers: Arc<Semaphore>,
}

impl SchedulerEngine {
    pub fn new(
        store: Arc<SchedulerDb>,
        registry: Arc<HandlerRegistry>,
        ctx: TaskContext,
        cfg: SchedulerConfig,
    ) -> Self {
        let owner = format!("raceday-{}", &uuid::Uuid::new_v4().to_string()[..8]);
        let workers = Arc::new(Semaphore::new(cfg.max_concurrent.max(1)));
        Self {
            store,
            registry,
            ctx,
            cfg,
            owner,
            running: AtomicBool::new(false),
            workers,
        }
    }

    pub fn store(&self) -> &Arc<SchedulerDb> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Lifecycle query for the management surface.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// One scheduler tick. Returns the number of dispatched tasks. All
    /// failures are logged and swallowed — the loop owns no error path.
    pub async fn tick(self: &Arc<Self>) -> usize {
        let now = Utc::now();

        let stale_cutoff = now - Duration::seconds(self.cfg.claim_stale_secs);
        match self.store.release_stale_claims(stale_cutoff) {
            Ok(0) => {}
            Ok(n) => tracing::warn!("released {n} stale claim(s) from dead scheduler processes"),
            Err(e) => tracing::error!("stale-claim release failed: {e}"),
        }

        let due = match self.store.due_tasks(now) {
            Ok(due) => due,
            Err(e) => {
                tracing::error!("due-task scan failed: {e}");
                return 0;
            }
        };

        let mut dispatched = 0;
        for task in due {
            // Worker slot first, claim second: a task we cannot run right
            // now stays unclaimed and eligible for the next tick (or for a
            // sibling process).
            let Ok(permit) = self.workers.clone().try_acquire_owned() else {
                tracing::debug!("worker pool full, deferring remaining due tasks");
                break;
            };

            match self.store.claim(&task.id, &self.owner, now) {
                Ok(true) => {}
                Ok(false) => continue, // raced by a sibling process
                Err(e) => {
                    tracing::error!("claim failed for task {}: {e}", task.id);
                    continue;
                }
            }

            dispatched += 1;
            let engine = self.clone();
            tokio::spawn(async move {
                engine.run_claimed(task).await;
                drop(permit);
            });
        }
        dispatched
    }

    /// Run one claimed task to completion and release the claim.
    async fn run_claimed(self: Arc<Self>, task: TaskDefinition) {
        let started = Utc::now();
        let kind = task.kind.as_str().to_string();

        let (outcome, error) = match self.registry.resolve(&kind) {
            None => (
                ExecOutcome::Failure,
                Some(format!("no handler registered for task kind '{kind}'")),
            ),
            Some(handler) => {
                let budget = std::time::Duration::from_secs(self.cfg.handler_timeout_secs);
                match tokio::time::timeout(budget, handler.run(&self.ctx, &task)).await {
                    Ok(Ok(result)) => {
                        tracing::info!("task {} ({kind}): {}", task.id, result.summary);
                        (ExecOutcome::Success, None)
                    }
                    Ok(Err(e)) => {
                        tracing::warn!("task {} ({kind}) failed: {e}", task.id);
                        (ExecOutcome::Failure, Some(e.to_string()))
                    }
                    Err(_) => {
                        tracing::warn!(
                            "task {} ({kind}) exceeded {}s, abandoned",
                            task.id,
                            self.cfg.handler_timeout_secs
                        );
                        (
                            ExecOutcome::Timeout,
                            Some(format!(
                                "execution exceeded the {}s timeout",
                                self.cfg.handler_timeout_secs
                            )),
                        )
                    }
                }
            }
        };

        // Advance from the invocation time regardless of outcome. The
        // scheduler never retries; retry policy lives with the consumers.
        let next_run = task.schedule.next_after(started).unwrap_or_else(|| {
            tracing::warn!("task {} has an unschedulable cron expression", task.id);
            started + Duration::seconds(3600)
        });

        if let Err(e) = self.store.complete_run(
            &task.id,
            started,
            Utc::now(),
            outcome,
            error.as_deref(),
            next_run,
        ) {
            tracing::error!("failed to record execution for task {}: {e}", task.id);
        }
    }
}

/// Spawn the scheduler loop as a background tokio task. Stops when
/// `set_running(false)` is observed at the next tick boundary.
pub fn spawn_scheduler(engine: Arc<SchedulerEngine>, tick_secs: u64) -> tokio::task::JoinHandle<()> {
    engine.set_running(true);
    tracing::info!("scheduler started (tick every {tick_secs}s)");

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(tick_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if !engine.is_running() {
                tracing::info!("scheduler stopped");
                return;
            }
            let dispatched = engine.tick().await;
            if dispatched > 0 {
                tracing::debug!("tick dispatched {dispatched} task(s)");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use raceday_core::error::{RacedayError, Result};
    use raceday_core::events::EventBus;
    use raceday_domain::DomainDb;
    use std::sync::atomic::AtomicUsize;

    use crate::registry::{TaskHandler, TaskOutcome};
    use crate::tasks::{Schedule, TaskDefinition, TaskKind};

    struct CountingHandler {
        kind: &'static str,
        calls: Arc<AtomicUsize>,
        delay_ms: u64,
        fail: bool,
    }

    #[async_trait]
    impl TaskHandler for CountingHandler {
        fn kind(&self) -> &str {
            self.kind
        }

        async fn run(&self, _ctx: &TaskContext, _task: &TaskDefinition) -> Result<TaskOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay_ms > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
            }
            if self.fail {
                return Err(RacedayError::handler("intentional test failure"));
            }
            Ok(TaskOutcome::summary("ok"))
        }
    }

    fn test_ctx() -> TaskContext {
        let db = Arc::new(DomainDb::open_in_memory().unwrap());
        TaskContext::new(
            db.clone(),
            db.clone(),
            db.clone(),
            db,
            Arc::new(EventBus::new()),
        )
    }

    fn engine_with(
        handler: CountingHandler,
        def: &TaskDefinition,
        timeout_secs: u64,
    ) -> Arc<SchedulerEngine> {
        let store = Arc::new(SchedulerDb::open_in_memory().unwrap());
        store.register_builtin(def).unwrap();
        let mut registry = HandlerRegistry::new();
        registry.register(Arc::new(handler));
        let cfg = SchedulerConfig {
            tick_secs: 1,
            max_concurrent: 4,
            handler_timeout_secs: timeout_secs,
            claim_stale_secs: 300,
        };
        Arc::new(SchedulerEngine::new(
            store,
            Arc::new(registry),
            test_ctx(),
            cfg,
        ))
    }

    async fn wait_for_executions(engine: &Arc<SchedulerEngine>, task_id: &str, n: usize) {
        for _ in 0..200 {
            if engine.store.executions(task_id, 50).unwrap().len() >= n {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("task {task_id} never reached {n} executions");
    }

    fn counting(kind: &'static str, delay_ms: u64, fail: bool) -> (CountingHandler, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            CountingHandler {
                kind,
                calls: calls.clone(),
                delay_ms,
                fail,
            },
            calls,
        )
    }

    #[tokio::test]
    async fn test_inactive_task_never_invoked() {
        let def = TaskDefinition::builtin(
            "race-pending-timeout",
            "Pending timeout",
            TaskKind::RacePendingTimeout,
            Schedule::Interval { every_secs: 60 },
        );
        let (handler, calls) = counting("race-pending-timeout", 0, false);
        let engine = engine_with(handler, &def, 30);
        engine.store.set_active(&def.id, false).unwrap();

        for _ in 0..3 {
            assert_eq!(engine.tick().await, 0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_past_due_runs_and_advances_next_run() {
        let def = TaskDefinition::builtin(
            "score-recalculation",
            "Score recalculation",
            TaskKind::ScoreRecalculation,
            Schedule::Interval { every_secs: 3600 },
        );
        let (handler, calls) = counting("score-recalculation", 0, false);
        let engine = engine_with(handler, &def, 30);

        let before = Utc::now();
        assert_eq!(engine.tick().await, 1);
        wait_for_executions(&engine, &def.id, 1).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let stored = engine.store.get_task(&def.id).unwrap().unwrap();
        assert_eq!(stored.last_run_status, crate::tasks::RunStatus::Success);
        // next_run ≈ execution time + 3600s
        let delta = (stored.next_run_at.unwrap() - before).num_seconds();
        assert!((3595..=3610).contains(&delta), "unexpected advance: {delta}s");

        // Not due again within the hour.
        assert_eq!(engine.tick().await, 0);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_and_loop_survives() {
        let def = TaskDefinition::builtin(
            "race-in-progress-timeout",
            "In-progress timeout",
            TaskKind::RaceInProgressTimeout,
            Schedule::Interval { every_secs: 0 },
        );
        let (handler, calls) = counting("race-in-progress-timeout", 0, true);
        let engine = engine_with(handler, &def, 30);

        engine.tick().await;
        wait_for_executions(&engine, &def.id, 1).await;

        let stored = engine.store.get_task(&def.id).unwrap().unwrap();
        assert_eq!(stored.last_run_status, crate::tasks::RunStatus::Failure);
        assert!(stored.last_error.as_deref().unwrap().contains("intentional"));

        // Zero-interval schedule: immediately due again, and the engine keeps going.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        engine.tick().await;
        wait_for_executions(&engine, &def.id, 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let execs = engine.store.executions(&def.id, 10).unwrap();
        assert!(execs.iter().all(|e| e.outcome == ExecOutcome::Failure));
    }

    #[tokio::test]
    async fn test_no_overlapping_executions_of_one_task() {
        let def = TaskDefinition::builtin(
            "race-pending-timeout",
            "Pending timeout",
            TaskKind::RacePendingTimeout,
            Schedule::Interval { every_secs: 0 },
        );
        let (handler, calls) = counting("race-pending-timeout", 300, false);
        let engine = engine_with(handler, &def, 30);

        assert_eq!(engine.tick().await, 1);
        // The first run holds the claim; repeated ticks must not double-run.
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        assert_eq!(engine.tick().await, 0);
        assert_eq!(engine.tick().await, 0);

        wait_for_executions(&engine, &def.id, 1).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // After completion the claim is free and a new run dispatches.
        engine.tick().await;
        wait_for_executions(&engine, &def.id, 2).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_timed_out_handler_is_abandoned() {
        let def = TaskDefinition::builtin(
            "race-pending-timeout",
            "Pending timeout",
            TaskKind::RacePendingTimeout,
            Schedule::Interval { every_secs: 3600 },
        );
        let (handler, _calls) = counting("race-pending-timeout", 5000, false);
        let engine = engine_with(handler, &def, 1);

        engine.tick().await;
        wait_for_executions(&engine, &def.id, 1).await;

        let execs = engine.store.executions(&def.id, 10).unwrap();
        assert_eq!(execs[0].outcome, ExecOutcome::Timeout);
        let stored = engine.store.get_task(&def.id).unwrap().unwrap();
        assert_eq!(stored.last_run_status, crate::tasks::RunStatus::Failure);
        assert!(stored.last_error.as_deref().unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_unregistered_kind_records_failure() {
        let def = TaskDefinition::builtin(
            "tenant-digest",
            "Tenant digest",
            TaskKind::Custom("tenant-digest".into()),
            Schedule::Interval { every_secs: 3600 },
        );
        let (handler, calls) = counting("something-else", 0, false);
        let engine = engine_with(handler, &def, 30);

        engine.tick().await;
        wait_for_executions(&engine, &def.id, 1).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let stored = engine.store.get_task(&def.id).unwrap().unwrap();
        assert!(stored.last_error.as_deref().unwrap().contains("no handler registered"));
    }
}
