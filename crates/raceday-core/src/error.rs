//! Error taxonomy for the Raceday engine.
//!
//! The scheduler and dispatcher loops never propagate a failure upward —
//! everything is caught at the invocation boundary and turned into a
//! recorded status. The variants here exist so the boundary can record the
//! *right* status: a `StateConflict` is a silent no-op, a transient delivery
//! failure drives a retry, a permanent one terminates the record.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, RacedayError>;

/// Central error type for all Raceday crates.
#[derive(Debug, Error)]
pub enum RacedayError {
    /// Configuration could not be read, parsed, or interpreted.
    #[error("config error: {0}")]
    Config(String),

    /// A persistence operation failed (SQLite, serialization of stored rows).
    #[error("store error: {0}")]
    Store(String),

    /// A task handler failed. Recorded against the task, never retried by
    /// the scheduler itself.
    #[error("handler error: {0}")]
    Handler(String),

    /// The target entity is already in a terminal state. Callers treat this
    /// as a no-op, not a failure.
    #[error("state conflict: {0}")]
    StateConflict(String),

    /// Score recalculation failed for a single tournament.
    #[error("recalculation error: {0}")]
    Recalculation(String),

    /// Outbound delivery failed, classified transient or permanent.
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// A delivery channel could not be reached or misbehaved.
    #[error("channel error: {0}")]
    Channel(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RacedayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    /// True when the failure should be swallowed as an idempotence guard
    /// rather than recorded as an error.
    pub fn is_state_conflict(&self) -> bool {
        matches!(self, Self::StateConflict(_))
    }
}

/// Outcome classification for outbound delivery, decided by the channel.
///
/// Transient failures are retried until the record's retry budget is spent;
/// permanent failures (recipient gone, bot blocked) terminate immediately.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn transient(msg: impl Into<String>) -> Self {
        Self::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        Self::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }

    /// The failure text without the classification prefix.
    pub fn detail(&self) -> &str {
        match self {
            Self::Transient(s) | Self::Permanent(s) => s,
        }
    }
}
