//! Chat direct-message channel — the reference delivery implementation.
//!
//! Talks to the platform chat service's bot API: one `POST /dm` per
//! notification, authenticated with the bot token. The service's response
//! decides retryability via the shared status classification.

use async_trait::async_trait;
use serde::Deserialize;

use raceday_core::config::ChatConfig;
use raceday_core::error::DeliveryError;
use raceday_notify::delivery::DeliveryHandler;
use raceday_notify::formatters::Message;
use raceday_notify::records::NotificationRecord;

use crate::classify::{classify_status, classify_transport};

/// Chat-service API response envelope.
#[derive(Debug, Deserialize)]
struct ChatApiResponse {
    ok: bool,
    error: Option<String>,
}

/// Chat direct-message delivery handler.
pub struct ChatDmChannel {
    config: ChatConfig,
    client: reqwest::Client,
}

impl ChatDmChannel {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.config.api_base.trim_end_matches('/'), endpoint)
    }

    /// Send one direct message to a platform user.
    pub async fn send_dm(&self, recipient: &str, message: &Message) -> Result<(), DeliveryError> {
        let context = format!("chat send to {recipient}");
        let body = serde_json::json!({
            "recipient": recipient,
            "subject": message.subject,
            "text": message.body,
        });

        let response = self
            .client
            .post(self.api_url("dm"))
            .bearer_auth(&self.config.bot_token)
            .json(&body)
            .timeout(std::time::Duration::from_secs(self.config.timeout_secs))
            .send()
            .await
            .map_err(|e| classify_transport(&e, &context))?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status.as_u16(), &context));
        }

        // The service can refuse inside a 200 envelope (e.g. DMs disabled).
        let api: ChatApiResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::transient(format!("{context}: invalid response: {e}")))?;
        if !api.ok {
            return Err(DeliveryError::permanent(format!(
                "{context}: {}",
                api.error.unwrap_or_else(|| "rejected by chat service".into())
            )));
        }

        tracing::debug!("chat DM delivered to {recipient}");
        Ok(())
    }
}

#[async_trait]
impl DeliveryHandler for ChatDmChannel {
    fn method(&self) -> &str {
        "chat-dm"
    }

    async fn deliver(
        &self,
        record: &NotificationRecord,
        message: &Message,
    ) -> Result<(), DeliveryError> {
        self.send_dm(&record.user_id, message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(api_base: &str) -> ChatDmChannel {
        ChatDmChannel::new(ChatConfig {
            enabled: true,
            api_base: api_base.into(),
            bot_token: "test-token".into(),
            timeout_secs: 1,
        })
    }

    #[test]
    fn test_method_name() {
        assert_eq!(channel("https://chat.example.test/api").method(), "chat-dm");
    }

    #[test]
    fn test_api_url_handles_trailing_slash() {
        assert_eq!(
            channel("https://chat.example.test/api/").api_url("dm"),
            "https://chat.example.test/api/dm"
        );
        assert_eq!(
            channel("https://chat.example.test/api").api_url("dm"),
            "https://chat.example.test/api/dm"
        );
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        // Nothing listens on this port; the connect error must classify as
        // transient so the dispatcher retries.
        let ch = channel("http://127.0.0.1:1/api");
        let msg = Message {
            subject: "s".into(),
            body: "b".into(),
        };
        let err = ch.send_dm("user-1", &msg).await.unwrap_err();
        assert!(err.is_transient());
    }
}
