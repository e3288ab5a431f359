//! # Raceday Scheduler
//!
//! The unified task-scheduling engine: periodic business-logic runs as
//! TaskDefinitions (built-in or tenant-defined) against a SQLite store, and
//! a tick loop claims due definitions and fans them out to a bounded worker
//! pool. Mutual exclusion is claim-based — a conditional UPDATE, never an
//! in-memory lock — so the design stays correct when more than one scheduler
//! process shares the database.
//!
//! ## Architecture
//! ```text
//! tick (tokio interval)
//!   ├── release stale claims (dead processes)
//!   ├── scan: active, unclaimed, next_run_at <= now
//!   └── per due task: claim → spawn (bounded by semaphore)
//!         ├── handler lookup (capability table, fixed at startup)
//!         ├── invoke under per-execution timeout
//!         └── record ExecutionRecord, advance next_run_at, release claim
//!
//! built-in handlers
//!   ├── race-pending-timeout      warn, then forfeit stale pending races
//!   ├── race-in-progress-timeout  forfeit over-long running races
//!   └── score-recalculation      recompute unit pars + race scores
//! ```
//!
//! The engine never retries: a failed run is recorded and the task waits for
//! its next scheduled slot. Retry policy belongs to consumers that need it
//! (the notification dispatcher).

pub mod cron;
pub mod engine;
pub mod handlers;
pub mod registry;
pub mod store;
pub mod tasks;

pub use engine::SchedulerEngine;
pub use registry::{HandlerRegistry, TaskContext, TaskHandler, TaskOutcome};
pub use store::SchedulerDb;
pub use tasks::{
    ExecOutcome, ExecutionRecord, RunStatus, Schedule, TaskDefinition, TaskKind, TaskScope,
    TaskSource,
};
