//! HTTP webhook notification channel.

use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;

use super::NotifyChannel;
use crate::notify::error::ChannelError;
use crate::notify::NotificationEnvelope;

/// Header the receiving end deduplicates on.
const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Posts notifications as JSON to a chat or paging webhook.
pub struct WebhookChannel {
    webhook_url: Option<String>,
    client: reqwest::Client,
}

impl WebhookChannel {
    /// Create a webhook channel posting to `webhook_url`.
    ///
    /// An empty URL leaves the channel disabled; every send then fails
    /// with [`ChannelError::NotConfigured`].
    #[must_use]
    pub fn new(webhook_url: impl Into<String>) -> Self {
        let webhook_url = Some(webhook_url.into()).filter(|u| !u.is_empty());
        if webhook_url.is_some() {
            debug!("Webhook notifications enabled");
        }
        Self {
            webhook_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.webhook_url.is_some()
    }

    fn format_payload(envelope: &NotificationEnvelope) -> WebhookPayload<'_> {
        let request = &envelope.request;
        WebhookPayload {
            text: format!(
                "[{}] level {} | {}",
                request.service, request.level, request.message
            ),
            service: &request.service,
            level: request.level,
            alert_id: request.alert_id.as_deref(),
            responder: request.responder.as_deref(),
            dedup_key: &envelope.key,
        }
    }
}

#[async_trait]
impl NotifyChannel for WebhookChannel {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn send(&self, envelope: &NotificationEnvelope) -> Result<(), ChannelError> {
        let url = self
            .webhook_url
            .as_deref()
            .ok_or_else(|| ChannelError::NotConfigured("webhook URL not set".into()))?;

        let response = self
            .client
            .post(url)
            .header(IDEMPOTENCY_HEADER, envelope.key.as_str())
            .json(&Self::format_payload(envelope))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ChannelError::Status {
                status: status.as_u16(),
            });
        }

        debug!(key = %envelope.key, "Webhook notification delivered");
        Ok(())
    }
}

#[derive(Serialize)]
struct WebhookPayload<'a> {
    text: String,
    service: &'a str,
    level: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    alert_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    responder: Option<&'a str>,
    dedup_key: &'a str,
}
