//! The delivery-method contract.
//!
//! One handler per delivery method, registered into the dispatcher's table
//! at startup. The handler owns failure classification: transient failures
//! are retried by the dispatcher, permanent ones terminate the record.

use async_trait::async_trait;

use raceday_core::error::DeliveryError;

use crate::formatters::Message;
use crate::records::NotificationRecord;

/// A per-method sender. The chat direct-message handler is the in-tree
/// reference implementation; email and further methods plug in behind the
/// same contract.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    /// The delivery method this handler serves ("chat-dm", "webhook", ...).
    fn method(&self) -> &str;

    async fn deliver(
        &self,
        record: &NotificationRecord,
        message: &Message,
    ) -> Result<(), DeliveryError>;
}
