//! Notification records — the queue's data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Delivery lifecycle of one notification.
///
/// `Sending` is the in-flight claim marker; `Sent` and `Failed` are terminal
/// and immutable. Legal transitions: pending→sending, retrying→sending,
/// sending→{sent, retrying, failed} — all enforced as conditional updates in
/// the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyStatus {
    Pending,
    Retrying,
    Sending,
    Sent,
    Failed,
}

impl NotifyStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Retrying => "retrying",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "retrying" => Self::Retrying,
            "sending" => Self::Sending,
            "sent" => Self::Sent,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// One queued notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub id: i64,
    /// Platform identity of the recipient.
    pub user_id: String,
    /// Event kind that produced this record ("race.warning", ...).
    pub event_type: String,
    /// Opaque payload, interpreted by the formatter for the event type.
    pub payload: serde_json::Value,
    /// Delivery method, resolved against the handler table ("chat-dm", ...).
    pub method: String,
    pub status: NotifyStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
