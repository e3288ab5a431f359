//! Event-type formatters.
//!
//! A lookup table from event type to a message formatter, populated at
//! initialization, with a generic fallback so a novel event type never
//! hard-fails delivery — it just reads less nicely.

use std::collections::HashMap;

use raceday_core::events::{RACE_FORFEITED, RACE_WARNING};

use crate::records::NotificationRecord;

/// A rendered notification, ready for a delivery handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub subject: String,
    pub body: String,
}

type Formatter = fn(&NotificationRecord) -> Message;

/// Event type → formatter table.
pub struct FormatterTable {
    table: HashMap<String, Formatter>,
}

impl FormatterTable {
    /// The built-in formatters.
    pub fn standard() -> Self {
        let mut table: HashMap<String, Formatter> = HashMap::new();
        table.insert(RACE_WARNING.to_string(), format_race_warning);
        table.insert(RACE_FORFEITED.to_string(), format_race_forfeited);
        Self { table }
    }

    pub fn register(&mut self, event_type: &str, formatter: Formatter) {
        self.table.insert(event_type.to_string(), formatter);
    }

    /// Render a record, falling back to the generic formatter for unmapped
    /// event types.
    pub fn format(&self, record: &NotificationRecord) -> Message {
        match self.table.get(&record.event_type) {
            Some(f) => f(record),
            None => format_generic(record),
        }
    }
}

fn format_race_warning(record: &NotificationRecord) -> Message {
    let race = record.payload["race_id"].as_str().unwrap_or("your race");
    let minutes = record.payload["minutes_left"].as_i64().unwrap_or(0);
    Message {
        subject: "Your race is about to time out".to_string(),
        body: format!(
            "Race {race} will be forfeited in about {minutes} minute(s) unless you start. \
             Join your room and get going!"
        ),
    }
}

fn format_race_forfeited(record: &NotificationRecord) -> Message {
    let race = record.payload["race_id"].as_str().unwrap_or("your race");
    let reason = record.payload["reason"].as_str().unwrap_or("timeout");
    Message {
        subject: "Race forfeited".to_string(),
        body: format!("Race {race} was forfeited: {reason}."),
    }
}

fn format_generic(record: &NotificationRecord) -> Message {
    Message {
        subject: format!("Raceday notification ({})", record.event_type),
        body: serde_json::to_string_pretty(&record.payload)
            .unwrap_or_else(|_| record.payload.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::NotifyStatus;
    use chrono::Utc;

    fn record(event_type: &str, payload: serde_json::Value) -> NotificationRecord {
        NotificationRecord {
            id: 1,
            user_id: "user-1".into(),
            event_type: event_type.into(),
            payload,
            method: "chat-dm".into(),
            status: NotifyStatus::Pending,
            retry_count: 0,
            max_retries: 3,
            error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_race_warning_format() {
        let table = FormatterTable::standard();
        let msg = table.format(&record(
            "race.warning",
            serde_json::json!({"race_id": "r42", "minutes_left": 7}),
        ));
        assert!(msg.body.contains("r42"));
        assert!(msg.body.contains("7 minute"));
    }

    #[test]
    fn test_race_forfeited_format() {
        let table = FormatterTable::standard();
        let msg = table.format(&record(
            "race.forfeited",
            serde_json::json!({"race_id": "r42", "reason": "entrant did not start"}),
        ));
        assert_eq!(msg.subject, "Race forfeited");
        assert!(msg.body.contains("entrant did not start"));
    }

    #[test]
    fn test_unknown_event_type_falls_back() {
        let table = FormatterTable::standard();
        let msg = table.format(&record(
            "tournament.finale",
            serde_json::json!({"bracket": "grand"}),
        ));
        assert!(msg.subject.contains("tournament.finale"));
        assert!(msg.body.contains("bracket"));
    }

    #[test]
    fn test_custom_registration_wins() {
        let mut table = FormatterTable::standard();
        table.register("tournament.finale", |_r| Message {
            subject: "Finale!".into(),
            body: "See you there".into(),
        });
        let msg = table.format(&record("tournament.finale", serde_json::json!({})));
        assert_eq!(msg.subject, "Finale!");
    }
}
