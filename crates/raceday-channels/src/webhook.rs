//! Generic HTTP webhook channel — POST the rendered notification as JSON.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use raceday_core::error::DeliveryError;
use raceday_notify::delivery::DeliveryHandler;
use raceday_notify::formatters::Message;
use raceday_notify::records::NotificationRecord;

use crate::classify::{classify_status, classify_transport};

/// Webhook channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub url: String,
    /// Extra headers, e.g. an auth header.
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

/// Webhook delivery handler.
pub struct WebhookChannel {
    config: WebhookConfig,
    client: reqwest::Client,
}

impl WebhookChannel {
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl DeliveryHandler for WebhookChannel {
    fn method(&self) -> &str {
        "webhook"
    }

    async fn deliver(
        &self,
        record: &NotificationRecord,
        message: &Message,
    ) -> Result<(), DeliveryError> {
        let context = format!("webhook post for notification {}", record.id);
        let mut request = self
            .client
            .post(&self.config.url)
            .json(&serde_json::json!({
                "user_id": record.user_id,
                "event_type": record.event_type,
                "subject": message.subject,
                "body": message.body,
                "payload": record.payload,
                "created_at": record.created_at.to_rfc3339(),
            }))
            .timeout(std::time::Duration::from_secs(self.config.timeout_secs));

        for (key, value) in &self.config.headers {
            request = request.header(key.as_str(), value.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| classify_transport(&e, &context))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &context));
        }
        tracing::debug!("webhook delivered for notification {}", record.id);
        Ok(())
    }
}
