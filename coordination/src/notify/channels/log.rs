//! Structured-log notification channel.

use async_trait::async_trait;
use tracing::info;

use super::NotifyChannel;
use crate::notify::error::ChannelError;
use crate::notify::NotificationEnvelope;

/// Writes every notification as a structured log line.
///
/// Used when no external transport is configured. Log output is not
/// user-facing, so redelivery of the same key is harmless.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogChannel;

impl LogChannel {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotifyChannel for LogChannel {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn send(&self, envelope: &NotificationEnvelope) -> Result<(), ChannelError> {
        let request = &envelope.request;
        info!(
            target: "incident_notify",
            service = %request.service,
            level = request.level,
            alert_id = request.alert_id.as_deref().unwrap_or(""),
            responder = request.responder.as_deref().unwrap_or(""),
            key = %envelope.key,
            "{}",
            request.message
        );
        Ok(())
    }
}
