//! Notification dispatch for incident events.
//!
//! The incident loop hands every side effect to a [`RetryingDispatcher`] as
//! a [`NotificationRequest`]. The dispatcher wraps the request in a
//! [`NotificationEnvelope`] carrying a content-derived deduplication key,
//! then delivers it through a [`NotifyChannel`] with exponential backoff.
//!
//! # Architecture
//!
//! - [`NotifyChannel`] trait defines the transport interface
//! - [`LogChannel`] writes notifications to the structured log (default)
//! - [`MemoryChannel`] records deliveries in memory, deduplicating by key
//! - [`WebhookChannel`] posts JSON to an HTTP endpoint
//! - [`RetryingDispatcher`] applies the [`RetryPolicy`] on top of any channel
//!
//! Delivery outcome is never fed back into incident state.

pub mod channels;
pub mod error;
pub mod retry;

pub use channels::log::LogChannel;
pub use channels::memory::MemoryChannel;
pub use channels::webhook::WebhookChannel;
pub use channels::NotifyChannel;
pub use error::{ChannelError, DispatchError};
pub use retry::{DispatchReceipt, RetryPolicy, RetryingDispatcher};

use serde::{Deserialize, Serialize};

/// A single notification produced by an incident transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    /// Service the incident belongs to
    pub service: String,
    /// Human-readable message
    pub message: String,
    /// Escalation level at the time of the notification
    pub level: u32,
    /// Alert that triggered the notification
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_id: Option<String>,
    /// Responder involved in the transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder: Option<String>,
    /// Log sequence number of the event that produced this notification
    pub sequence: u64,
    /// Opening time of the incident (unix millis), scoping `sequence`
    #[serde(default)]
    pub opened_at_ms: i64,
}

impl NotificationRequest {
    pub fn new(service: &str, sequence: u64, level: u32, message: impl Into<String>) -> Self {
        Self {
            service: service.to_string(),
            message: message.into(),
            level,
            alert_id: None,
            responder: None,
            sequence,
            opened_at_ms: 0,
        }
    }

    pub fn opened_at(mut self, opened_at_ms: i64) -> Self {
        self.opened_at_ms = opened_at_ms;
        self
    }

    pub fn with_alert(mut self, alert_id: &str) -> Self {
        self.alert_id = Some(alert_id.to_string());
        self
    }

    pub fn with_responder(mut self, responder: &str) -> Self {
        self.responder = Some(responder.to_string());
        self
    }

    /// Deduplication key derived from the request content.
    ///
    /// Two deliveries of the same logical notification (same originating
    /// event, same content) always produce the same key. Identical content
    /// from two distinct events differs by `sequence`, and two incidents
    /// of the same service differ by `opened_at_ms`.
    pub fn dedup_key(&self) -> String {
        let opened_at = self.opened_at_ms.to_string();
        let sequence = self.sequence.to_string();
        let level = self.level.to_string();
        let mut hasher = blake3::Hasher::new();
        for part in [
            self.service.as_str(),
            opened_at.as_str(),
            sequence.as_str(),
            self.message.as_str(),
            level.as_str(),
            self.alert_id.as_deref().unwrap_or(""),
            self.responder.as_deref().unwrap_or(""),
        ] {
            hasher.update(part.as_bytes());
            hasher.update(&[0x1f]);
        }
        hasher.finalize().to_hex().to_string()
    }
}

/// A request as it crosses the transport boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEnvelope {
    /// Idempotency key; channels must not deliver the same key twice
    pub key: String,
    /// The notification itself
    #[serde(flatten)]
    pub request: NotificationRequest,
}

impl NotificationEnvelope {
    pub fn new(request: NotificationRequest) -> Self {
        Self {
            key: request.dedup_key(),
            request,
        }
    }
}
