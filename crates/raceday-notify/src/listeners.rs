//! Event-bus listeners that feed the queue.
//!
//! The bridge between the engine's domain events and delivery work: each
//! listener turns an event into one pending NotificationRecord for the
//! affected entrant. The insert is the whole job — rendering, sending, and
//! retrying all happen later, in the dispatch loop.

use std::sync::Arc;

use async_trait::async_trait;

use raceday_core::config::NotifyConfig;
use raceday_core::error::{RacedayError, Result};
use raceday_core::events::{DomainEvent, EventBus, EventListener, RACE_FORFEITED, RACE_WARNING};

use crate::store::NotifyDb;

/// Enqueues one notification per race event, addressed to the entrant.
pub struct RaceEventListener {
    store: Arc<NotifyDb>,
    /// Delivery method for the enqueued records.
    method: String,
    max_retries: u32,
}

impl RaceEventListener {
    pub fn new(store: Arc<NotifyDb>, method: &str, max_retries: u32) -> Self {
        Self {
            store,
            method: method.to_string(),
            max_retries,
        }
    }
}

#[async_trait]
impl EventListener for RaceEventListener {
    async fn on_event(&self, event: &DomainEvent) -> Result<()> {
        let Some(entrant) = event.payload["entrant_id"].as_str() else {
            return Err(RacedayError::handler(format!(
                "event '{}' has no entrant_id, cannot address a notification",
                event.kind
            )));
        };
        let id = self.store.enqueue(
            entrant,
            &event.kind,
            &self.method,
            &event.payload,
            self.max_retries,
        )?;
        tracing::debug!("enqueued notification {id} for {entrant} ({})", event.kind);
        Ok(())
    }
}

/// Wire the standard race-event listeners into the bus. Called once at
/// startup.
pub async fn register_listeners(bus: &EventBus, store: Arc<NotifyDb>, cfg: &NotifyConfig, method: &str) {
    let listener = Arc::new(RaceEventListener::new(store, method, cfg.max_retries));
    bus.subscribe(RACE_WARNING, listener.clone()).await;
    bus.subscribe(RACE_FORFEITED, listener).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use raceday_core::types::{Race, RaceStatus};

    fn race() -> Race {
        Race {
            id: "r1".into(),
            tenant_id: "t1".into(),
            entrant_id: "user-7".into(),
            room_ref: Some("room-1".into()),
            status: RaceStatus::Pending,
            created_at: chrono::Utc::now(),
            started_at: None,
            finished_at: None,
            warning_sent_at: None,
        }
    }

    #[tokio::test]
    async fn test_events_become_pending_records() {
        let store = Arc::new(NotifyDb::open_in_memory().unwrap());
        let bus = EventBus::new();
        register_listeners(&bus, store.clone(), &NotifyConfig::default(), "chat-dm").await;

        bus.publish(DomainEvent::race_warning(&race(), 10)).await;
        bus.publish(DomainEvent::race_forfeited(&race(), "pending timeout")).await;

        let recent = store.recent(10).unwrap();
        assert_eq!(recent.len(), 2);
        assert!(recent.iter().all(|r| r.user_id == "user-7"));
        assert!(recent.iter().all(|r| r.method == "chat-dm"));
        assert!(recent.iter().any(|r| r.event_type == RACE_WARNING));
        assert!(recent.iter().any(|r| r.event_type == RACE_FORFEITED));
    }

    #[tokio::test]
    async fn test_unaddressable_event_is_rejected() {
        let store = Arc::new(NotifyDb::open_in_memory().unwrap());
        let listener = RaceEventListener::new(store.clone(), "chat-dm", 3);

        let event = DomainEvent::new(RACE_WARNING, "t1", serde_json::json!({"race_id": "r1"}));
        assert!(listener.on_event(&event).await.is_err());
        assert!(store.recent(10).unwrap().is_empty());
    }
}
