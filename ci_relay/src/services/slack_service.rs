//! Slack incoming-webhook notifications.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::SlackConfig;
use crate::error::RelayError;
use crate::models::notification::FailureNotification;

/// Delivers failure notifications to a chat channel or user.
#[async_trait]
pub trait ChatNotifier: Send + Sync {
    /// Whether a destination is configured. When false, callers skip sending.
    fn is_enabled(&self) -> bool;

    async fn send(
        &self,
        channel: Option<&str>,
        notification: &FailureNotification,
    ) -> Result<(), RelayError>;
}

#[derive(Serialize)]
struct WebhookMessage<'a> {
    attachments: [&'a FailureNotification; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    channel: Option<&'a str>,
    icon_emoji: &'static str,
    unfurl_links: bool,
    unfurl_media: bool,
    username: &'a str,
}

pub struct SlackWebhookClient {
    http: reqwest::Client,
    config: SlackConfig,
}

impl SlackWebhookClient {
    pub fn new(config: SlackConfig) -> Result<Self, RelayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { http, config })
    }
}

#[async_trait]
impl ChatNotifier for SlackWebhookClient {
    fn is_enabled(&self) -> bool {
        self.config.webhook_url.is_some()
    }

    async fn send(
        &self,
        channel: Option<&str>,
        notification: &FailureNotification,
    ) -> Result<(), RelayError> {
        let Some(url) = self.config.webhook_url.as_deref() else {
            return Ok(());
        };

        let message = WebhookMessage {
            attachments: [notification],
            channel,
            icon_emoji: ":red_circle:",
            unfurl_links: false,
            unfurl_media: false,
            username: &self.config.username,
        };

        let resp = self.http.post(url).json(&message).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(RelayError::Chat(format!("Slack returned {status}: {text}")));
        }
        Ok(())
    }
}
