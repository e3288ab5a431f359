//! The dispatch loop.
//!
//! Polls the queue on a fixed interval, claims each eligible record, and
//! routes it to the delivery handler for its method. Retry policy lives
//! here, not in the scheduler: transient failures spend the record's retry
//! budget, permanent ones terminate immediately.
//!
//! Guarantee: at-least-once *attempted* delivery. A crash between a
//! successful handler call and the sent-write leaves the row in-flight; the
//! stale requeue returns it to the queue and the message may go out twice.
//! Accepted tradeoff, carried as documented.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{Duration, Utc};

use raceday_core::config::NotifyConfig;
use raceday_core::error::DeliveryError;

use crate::delivery::DeliveryHandler;
use crate::formatters::FormatterTable;
use crate::records::NotificationRecord;
use crate::store::NotifyDb;

/// Counters for one poll cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct DispatchStats {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub failed: usize,
}

/// The notification dispatcher.
pub struct Dispatcher {
    store: Arc<NotifyDb>,
    handlers: HashMap<String, Arc<dyn DeliveryHandler>>,
    formatters: FormatterTable,
    cfg: NotifyConfig,
    running: AtomicBool,
}

impl Dispatcher {
    pub fn new(store: Arc<NotifyDb>, formatters: FormatterTable, cfg: NotifyConfig) -> Self {
        Self {
            store,
            handlers: HashMap::new(),
            formatters,
            cfg,
            running: AtomicBool::new(false),
        }
    }

    /// Register a delivery-method handler. Called at startup.
    pub fn register_handler(&mut self, handler: Arc<dyn DeliveryHandler>) {
        let method = handler.method().to_string();
        if self.handlers.insert(method.clone(), handler).is_some() {
            tracing::warn!("delivery handler for method '{method}' was replaced");
        }
    }

    pub fn store(&self) -> &Arc<NotifyDb> {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
    }

    /// One poll cycle. All failures are recorded statuses, never
    /// propagated — the loop owns no error path.
    pub async fn poll_once(&self) -> DispatchStats {
        let mut stats = DispatchStats::default();

        let stale_cutoff = Utc::now() - Duration::seconds(self.cfg.sending_stale_secs);
        match self.store.requeue_stale(stale_cutoff) {
            Ok(0) => {}
            Ok(n) => tracing::warn!("requeued {n} stale in-flight notification(s)"),
            Err(e) => tracing::error!("stale requeue failed: {e}"),
        }

        let due = match self.store.due() {
            Ok(due) => due,
            Err(e) => {
                tracing::error!("notification scan failed: {e}");
                return stats;
            }
        };

        // Claim first, then dispatch the claimed set concurrently.
        let mut claimed = Vec::new();
        for record in due {
            match self.store.claim(record.id) {
                Ok(true) => claimed.push(record),
                Ok(false) => {} // raced by a sibling dispatcher
                Err(e) => tracing::error!("claim failed for notification {}: {e}", record.id),
            }
        }
        stats.claimed = claimed.len();

        let outcomes =
            futures::future::join_all(claimed.into_iter().map(|r| self.dispatch_one(r))).await;
        for outcome in outcomes {
            match outcome {
                DispatchOutcome::Sent => stats.sent += 1,
                DispatchOutcome::Retried => stats.retried += 1,
                DispatchOutcome::Failed => stats.failed += 1,
            }
        }
        stats
    }

    async fn dispatch_one(&self, record: NotificationRecord) -> DispatchOutcome {
        let Some(handler) = self.handlers.get(&record.method) else {
            // Retrying cannot help until a restart registers the method.
            let err = format!("no delivery handler registered for method '{}'", record.method);
            tracing::warn!("notification {}: {err}", record.id);
            if let Err(e) = self.store.mark_permanent_failure(record.id, &err) {
                tracing::error!("status write failed for notification {}: {e}", record.id);
            }
            return DispatchOutcome::Failed;
        };

        let message = self.formatters.format(&record);
        match handler.deliver(&record, &message).await {
            Ok(()) => {
                tracing::info!(
                    "notification {} sent to {} via {}",
                    record.id,
                    record.user_id,
                    record.method
                );
                if let Err(e) = self.store.mark_sent(record.id) {
                    tracing::error!("status write failed for notification {}: {e}", record.id);
                }
                DispatchOutcome::Sent
            }
            Err(DeliveryError::Transient(err)) => {
                tracing::warn!("notification {} transient failure: {err}", record.id);
                if let Err(e) = self.store.mark_transient_failure(record.id, &err) {
                    tracing::error!("status write failed for notification {}: {e}", record.id);
                }
                // The store decided terminal-vs-retry from the budget.
                match self.store.get(record.id) {
                    Ok(Some(r)) if r.status == crate::records::NotifyStatus::Failed => {
                        DispatchOutcome::Failed
                    }
                    _ => DispatchOutcome::Retried,
                }
            }
            Err(DeliveryError::Permanent(err)) => {
                tracing::warn!("notification {} permanent failure: {err}", record.id);
                if let Err(e) = self.store.mark_permanent_failure(record.id, &err) {
                    tracing::error!("status write failed for notification {}: {e}", record.id);
                }
                DispatchOutcome::Failed
            }
        }
    }
}

enum DispatchOutcome {
    Sent,
    Retried,
    Failed,
}

/// Spawn the dispatch loop as a background tokio task. Stops when
/// `set_running(false)` is observed at the next poll boundary.
pub fn spawn_dispatcher(dispatcher: Arc<Dispatcher>, poll_secs: u64) -> tokio::task::JoinHandle<()> {
    dispatcher.set_running(true);
    tracing::info!("notification dispatcher started (poll every {poll_secs}s)");

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(poll_secs.max(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if !dispatcher.is_running() {
                tracing::info!("notification dispatcher stopped");
                return;
            }
            let stats = dispatcher.poll_once().await;
            if stats.claimed > 0 {
                tracing::debug!(
                    "dispatch cycle: {} claimed, {} sent, {} retried, {} failed",
                    stats.claimed,
                    stats.sent,
                    stats.retried,
                    stats.failed
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    use crate::formatters::Message;
    use crate::records::NotifyStatus;

    /// Scripted delivery handler for tests.
    struct ScriptedHandler {
        method: &'static str,
        calls: Arc<AtomicUsize>,
        outcome: fn() -> Result<(), DeliveryError>,
    }

    #[async_trait]
    impl DeliveryHandler for ScriptedHandler {
        fn method(&self) -> &str {
            self.method
        }

        async fn deliver(
            &self,
            _record: &NotificationRecord,
            _message: &Message,
        ) -> Result<(), DeliveryError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.outcome)()
        }
    }

    fn dispatcher_with(
        method: &'static str,
        outcome: fn() -> Result<(), DeliveryError>,
    ) -> (Arc<Dispatcher>, Arc<AtomicUsize>) {
        let store = Arc::new(NotifyDb::open_in_memory().unwrap());
        let calls = Arc::new(AtomicUsize::new(0));
        let mut dispatcher = Dispatcher::new(store, FormatterTable::standard(), NotifyConfig::default());
        dispatcher.register_handler(Arc::new(ScriptedHandler {
            method,
            calls: calls.clone(),
            outcome,
        }));
        (Arc::new(dispatcher), calls)
    }

    #[tokio::test]
    async fn test_happy_path_reaches_sent() {
        let (dispatcher, calls) = dispatcher_with("chat-dm", || Ok(()));
        let id = dispatcher
            .store()
            .enqueue("user-1", "race.warning", "chat-dm", &serde_json::json!({"race_id": "r1"}), 3)
            .unwrap();

        let stats = dispatcher.poll_once().await;
        assert_eq!(stats.claimed, 1);
        assert_eq!(stats.sent, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            dispatcher.store().get(id).unwrap().unwrap().status,
            NotifyStatus::Sent
        );

        // Terminal record: the next poll finds nothing.
        let stats = dispatcher.poll_once().await;
        assert_eq!(stats.claimed, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_always_transient_exhausts_budget() {
        let (dispatcher, calls) =
            dispatcher_with("chat-dm", || Err(DeliveryError::transient("chat API 503")));
        let id = dispatcher
            .store()
            .enqueue("user-1", "race.forfeited", "chat-dm", &serde_json::json!({}), 3)
            .unwrap();

        // Four dispatch cycles against an always-transient handler.
        for _ in 0..4 {
            dispatcher.poll_once().await;
        }

        let rec = dispatcher.store().get(id).unwrap().unwrap();
        assert_eq!(rec.status, NotifyStatus::Failed);
        assert_eq!(rec.retry_count, 3);
        // Invocations stop once the record is terminal: 3, not 4.
        assert_eq!(calls.load(Ordering::SeqCst), 3);

        // And stay stopped.
        dispatcher.poll_once().await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_skips_retries() {
        let (dispatcher, calls) = dispatcher_with("chat-dm", || {
            Err(DeliveryError::permanent("recipient blocked the bot"))
        });
        let id = dispatcher
            .store()
            .enqueue("user-1", "race.forfeited", "chat-dm", &serde_json::json!({}), 3)
            .unwrap();

        let stats = dispatcher.poll_once().await;
        assert_eq!(stats.failed, 1);

        let rec = dispatcher.store().get(id).unwrap().unwrap();
        assert_eq!(rec.status, NotifyStatus::Failed);
        assert_eq!(rec.retry_count, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_method_fails_permanently() {
        let (dispatcher, calls) = dispatcher_with("chat-dm", || Ok(()));
        let id = dispatcher
            .store()
            .enqueue("user-1", "race.warning", "carrier-pigeon", &serde_json::json!({}), 3)
            .unwrap();

        let stats = dispatcher.poll_once().await;
        assert_eq!(stats.failed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let rec = dispatcher.store().get(id).unwrap().unwrap();
        assert_eq!(rec.status, NotifyStatus::Failed);
        assert!(rec.error.as_deref().unwrap().contains("carrier-pigeon"));
    }

    #[tokio::test]
    async fn test_unknown_event_type_still_delivers() {
        let (dispatcher, _calls) = dispatcher_with("chat-dm", || Ok(()));
        let id = dispatcher
            .store()
            .enqueue(
                "user-1",
                "tournament.finale",
                "chat-dm",
                &serde_json::json!({"bracket": "grand"}),
                3,
            )
            .unwrap();

        dispatcher.poll_once().await;
        // The generic formatter carried it through to sent.
        assert_eq!(
            dispatcher.store().get(id).unwrap().unwrap().status,
            NotifyStatus::Sent
        );
    }
}
