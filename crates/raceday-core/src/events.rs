//! In-process event bus.
//!
//! A capability table from event kind to registered listeners, populated
//! once at startup — no runtime reflection, no string-keyed method lookup.
//! The timeout handlers publish here; the notification crate subscribes and
//! enqueues delivery work. Publishing is cheap relative to the business
//! operation that triggers it: listeners do a single insert and failures are
//! logged, never propagated to the publisher.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;
use crate::types::Race;

/// Event kinds the engine emits.
pub const RACE_WARNING: &str = "race.warning";
pub const RACE_FORFEITED: &str = "race.forfeited";
pub const SCORES_RECALCULATED: &str = "scores.recalculated";

/// An event published on the bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent {
    pub kind: String,
    pub tenant_id: String,
    /// Opaque payload; listeners and formatters interpret it per kind.
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
}

impl DomainEvent {
    pub fn new(kind: &str, tenant_id: &str, payload: serde_json::Value) -> Self {
        Self {
            kind: kind.to_string(),
            tenant_id: tenant_id.to_string(),
            payload,
            occurred_at: Utc::now(),
        }
    }

    /// A pending race is approaching its timeout.
    pub fn race_warning(race: &Race, minutes_left: i64) -> Self {
        Self::new(
            RACE_WARNING,
            &race.tenant_id,
            serde_json::json!({
                "race_id": race.id,
                "entrant_id": race.entrant_id,
                "room_ref": race.room_ref,
                "minutes_left": minutes_left,
            }),
        )
    }

    /// A race was forfeited by the timeout enforcement.
    pub fn race_forfeited(race: &Race, reason: &str) -> Self {
        Self::new(
            RACE_FORFEITED,
            &race.tenant_id,
            serde_json::json!({
                "race_id": race.id,
                "entrant_id": race.entrant_id,
                "room_ref": race.room_ref,
                "reason": reason,
            }),
        )
    }
}

/// A subscriber on the bus.
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &DomainEvent) -> Result<()>;
}

/// Explicit kind → listeners table.
#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<HashMap<String, Vec<Arc<dyn EventListener>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one event kind. Called during initialization.
    pub async fn subscribe(&self, kind: &str, listener: Arc<dyn EventListener>) {
        let mut table = self.listeners.write().await;
        table.entry(kind.to_string()).or_default().push(listener);
    }

    /// Deliver an event to every listener registered for its kind.
    /// Listener failures are logged and swallowed — a broken subscriber must
    /// not abort the business operation that published the event.
    pub async fn publish(&self, event: DomainEvent) {
        let table = self.listeners.read().await;
        let Some(subscribers) = table.get(&event.kind) else {
            tracing::debug!("event '{}' has no listeners", event.kind);
            return;
        };
        for listener in subscribers {
            if let Err(e) = listener.on_event(&event).await {
                tracing::warn!("event listener failed for '{}': {e}", event.kind);
            }
        }
    }

    /// Number of listeners registered for a kind.
    pub async fn listener_count(&self, kind: &str) -> usize {
        self.listeners
            .read()
            .await
            .get(kind)
            .map(|v| v.len())
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter(AtomicUsize);

    #[async_trait]
    impl EventListener for Counter {
        async fn on_event(&self, _event: &DomainEvent) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl EventListener for Failing {
        async fn on_event(&self, _event: &DomainEvent) -> Result<()> {
            Err(crate::error::RacedayError::handler("listener broke"))
        }
    }

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        bus.subscribe(RACE_FORFEITED, counter.clone()).await;

        bus.publish(DomainEvent::new(RACE_FORFEITED, "t1", serde_json::json!({})))
            .await;
        bus.publish(DomainEvent::new(RACE_WARNING, "t1", serde_json::json!({})))
            .await;

        // Only the forfeited event matched the subscription.
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failing_listener_does_not_block_others() {
        let bus = EventBus::new();
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        bus.subscribe(RACE_WARNING, Arc::new(Failing)).await;
        bus.subscribe(RACE_WARNING, counter.clone()).await;

        bus.publish(DomainEvent::new(RACE_WARNING, "t1", serde_json::json!({})))
            .await;
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_no_listeners_is_fine() {
        let bus = EventBus::new();
        bus.publish(DomainEvent::new("unknown.kind", "t1", serde_json::json!({})))
            .await;
        assert_eq!(bus.listener_count("unknown.kind").await, 0);
    }
}
