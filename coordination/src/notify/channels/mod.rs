//! Notification channel implementations.

pub mod log;
pub mod memory;
pub mod webhook;

use async_trait::async_trait;

use super::error::ChannelError;
use super::NotificationEnvelope;

/// Trait for notification transports (chat, paging, logs).
///
/// Implementations must be idempotent on `envelope.key`: a redelivered
/// envelope whose effect already landed must not produce a second
/// user-visible notification.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    /// Get the name of this channel.
    fn name(&self) -> &'static str;

    /// Deliver one envelope.
    async fn send(&self, envelope: &NotificationEnvelope) -> Result<(), ChannelError>;
}
