//! Domain types shared between the engine and its collaborators.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a race.
///
/// Transitions are monotonic; the three terminal states never revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceStatus {
    Pending,
    InProgress,
    Finished,
    Forfeited,
    Cancelled,
}

impl RaceStatus {
    /// Terminal states are no-op targets for the timeout handlers.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Forfeited | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Finished => "finished",
            Self::Forfeited => "forfeited",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "finished" => Some(Self::Finished),
            "forfeited" => Some(Self::Forfeited),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for RaceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A race as the engine sees it. Owned by the platform's race domain; the
/// engine only reads it and requests guarded transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Race {
    pub id: String,
    pub tenant_id: String,
    /// Platform identity of the entrant, used for notifications.
    pub entrant_id: String,
    /// Coordination reference of the racing room, if one is open.
    pub room_ref: Option<String>,
    pub status: RaceStatus,
    /// Room-open time.
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Set at most once, when the pending-timeout warning goes out.
    pub warning_sent_at: Option<DateTime<Utc>>,
}

/// A tournament as the scoring handler sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tournament {
    pub id: String,
    pub tenant_id: String,
    pub name: String,
    /// Scoring strategy name, resolved against the strategy table at
    /// recalculation time ("median", "trimmed-mean", ...).
    pub strategy: String,
    pub is_active: bool,
}

/// A completed race time within one scoring unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceTime {
    pub race_id: String,
    /// Scoring unit the time belongs to (a game category, a track, ...).
    pub unit_id: String,
    /// Elapsed time in seconds.
    pub seconds: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!RaceStatus::Pending.is_terminal());
        assert!(!RaceStatus::InProgress.is_terminal());
        assert!(RaceStatus::Finished.is_terminal());
        assert!(RaceStatus::Forfeited.is_terminal());
        assert!(RaceStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_status_roundtrip() {
        for s in [
            RaceStatus::Pending,
            RaceStatus::InProgress,
            RaceStatus::Finished,
            RaceStatus::Forfeited,
            RaceStatus::Cancelled,
        ] {
            assert_eq!(RaceStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(RaceStatus::parse("nope"), None);
    }
}
