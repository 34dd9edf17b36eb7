//! In-memory notification channel.
//!
//! Records delivered envelopes and enforces key-based idempotence. Can be
//! told to fail a number of upcoming attempts, which makes it the channel of
//! choice for exercising retry behaviour.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use tracing::debug;

use super::NotifyChannel;
use crate::notify::error::ChannelError;
use crate::notify::{NotificationEnvelope, NotificationRequest};

#[derive(Debug, Default)]
struct Inner {
    delivered: Vec<NotificationEnvelope>,
    keys: HashSet<String>,
    fail_next: u32,
    attempts: u32,
    duplicates: u32,
}

/// Channel that keeps delivered notifications in memory.
#[derive(Debug, Default)]
pub struct MemoryChannel {
    inner: Mutex<Inner>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fail the next `count` send attempts with a transient error.
    pub fn fail_next(&self, count: u32) {
        self.lock().fail_next = count;
    }

    /// Requests delivered so far, in delivery order.
    pub fn delivered(&self) -> Vec<NotificationRequest> {
        self.lock()
            .delivered
            .iter()
            .map(|e| e.request.clone())
            .collect()
    }

    /// Messages delivered so far, in delivery order.
    pub fn messages(&self) -> Vec<String> {
        self.lock()
            .delivered
            .iter()
            .map(|e| e.request.message.clone())
            .collect()
    }

    /// Total send attempts, failed ones included.
    pub fn attempts(&self) -> u32 {
        self.lock().attempts
    }

    /// Redeliveries suppressed because their key had already landed.
    pub fn duplicates_suppressed(&self) -> u32 {
        self.lock().duplicates
    }
}

#[async_trait]
impl NotifyChannel for MemoryChannel {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn send(&self, envelope: &NotificationEnvelope) -> Result<(), ChannelError> {
        let mut inner = self.lock();
        inner.attempts += 1;

        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            return Err(ChannelError::Other("injected transient failure".to_string()));
        }

        if !inner.keys.insert(envelope.key.clone()) {
            inner.duplicates += 1;
            debug!(key = %envelope.key, "Duplicate notification suppressed");
            return Ok(());
        }

        inner.delivered.push(envelope.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(seq: u64, message: &str) -> NotificationEnvelope {
        NotificationEnvelope::new(NotificationRequest::new("db", seq, 0, message))
    }

    #[tokio::test]
    async fn test_records_deliveries_in_order() {
        let channel = MemoryChannel::new();
        channel.send(&envelope(0, "opened")).await.unwrap();
        channel.send(&envelope(1, "alert")).await.unwrap();

        assert_eq!(channel.messages(), vec!["opened", "alert"]);
        assert_eq!(channel.attempts(), 2);
    }

    #[tokio::test]
    async fn test_same_key_delivered_once() {
        let channel = MemoryChannel::new();
        let env = envelope(4, "Incident acknowledged by carol");
        channel.send(&env).await.unwrap();
        channel.send(&env).await.unwrap();

        assert_eq!(channel.delivered().len(), 1);
        assert_eq!(channel.duplicates_suppressed(), 1);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let channel = MemoryChannel::new();
        channel.fail_next(2);

        assert!(channel.send(&envelope(0, "x")).await.is_err());
        assert!(channel.send(&envelope(0, "x")).await.is_err());
        assert!(channel.send(&envelope(0, "x")).await.is_ok());
        assert_eq!(channel.attempts(), 3);
        assert_eq!(channel.delivered().len(), 1);
    }
}
