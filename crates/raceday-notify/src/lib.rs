//! # Raceday Notify
//!
//! The asynchronous notification pipeline: domain listeners enqueue records
//! in reaction to engine events, and an independent dispatch loop drains the
//! queue into delivery-method handlers with a bounded retry budget.
//!
//! ## Architecture
//! ```text
//! EventBus (race.warning, race.forfeited, ...)
//!   └── listeners → enqueue NotificationRecord (status=pending)
//!
//! dispatch poll (tokio interval)
//!   ├── requeue stale in-flight rows (crash recovery)
//!   ├── scan: status ∈ {pending, retrying}
//!   └── per record: claim (status→sending) → method handler
//!         ├── formatter lookup by event type (generic fallback)
//!         ├── success            → sent (terminal)
//!         ├── transient failure  → retrying, until the budget is spent
//!         └── permanent failure  → failed (terminal, no retry)
//! ```
//!
//! Delivery is at-least-once attempted, not exactly-once: a crash between a
//! successful send and the status write re-delivers after requeue. That
//! tradeoff is accepted and documented, not silently strengthened.

pub mod delivery;
pub mod dispatcher;
pub mod formatters;
pub mod listeners;
pub mod records;
pub mod store;

pub use delivery::DeliveryHandler;
pub use dispatcher::{DispatchStats, Dispatcher, spawn_dispatcher};
pub use formatters::{FormatterTable, Message};
pub use records::{NotificationRecord, NotifyStatus};
pub use store::NotifyDb;
