//! Retrying dispatcher: exponential backoff on top of any channel
//!
//! ```text
//! dispatch(request)
//!   ├─ attempt 1 ok                 → DispatchReceipt { attempts: 1 }
//!   ├─ attempt n fails (transient)  → sleep min(initial * mult^(n-1), cap), retry
//!   ├─ attempt n fails (permanent)  → DispatchError::Exhausted
//!   └─ attempt == max fails         → DispatchError::Exhausted
//! ```
//!
//! Every attempt carries the same envelope key, so a retry of a delivery
//! whose effect already landed is absorbed by the channel.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::channels::NotifyChannel;
use super::error::{ChannelError, DispatchError};
use super::{NotificationEnvelope, NotificationRequest};

/// Backoff and timeout parameters for notification delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the second attempt
    pub initial_interval: Duration,
    /// Growth factor between consecutive delays
    pub backoff_coefficient: f64,
    /// Upper bound on a single delay
    pub maximum_interval: Duration,
    /// Total attempts, the first one included
    pub maximum_attempts: u32,
    /// Timeout applied to each attempt
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(1),
            backoff_coefficient: 2.0,
            maximum_interval: Duration::from_secs(60),
            maximum_attempts: 5,
            attempt_timeout: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.initial_interval.as_secs_f64() * self.backoff_coefficient.powi(exponent);
        let cap = self.maximum_interval.as_secs_f64();
        if !secs.is_finite() || secs >= cap {
            return self.maximum_interval;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

/// Successful delivery report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    /// Deduplication key the notification was delivered under
    pub key: String,
    /// Attempts it took, the successful one included
    pub attempts: u32,
}

/// Delivers notifications through one channel under a [`RetryPolicy`].
pub struct RetryingDispatcher {
    channel: Arc<dyn NotifyChannel>,
    policy: RetryPolicy,
}

impl RetryingDispatcher {
    pub fn new(channel: Arc<dyn NotifyChannel>, policy: RetryPolicy) -> Self {
        Self { channel, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn channel_name(&self) -> &'static str {
        self.channel.name()
    }

    /// Deliver one notification, retrying transient failures.
    pub async fn dispatch(
        &self,
        request: NotificationRequest,
    ) -> Result<DispatchReceipt, DispatchError> {
        let envelope = NotificationEnvelope::new(request);
        let max_attempts = self.policy.maximum_attempts.max(1);
        let mut attempt = 1;

        loop {
            let result =
                match tokio::time::timeout(self.policy.attempt_timeout, self.channel.send(&envelope))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(ChannelError::Timeout {
                        timeout_ms: self.policy.attempt_timeout.as_millis() as u64,
                    }),
                };

            match result {
                Ok(()) => {
                    debug!(
                        channel = self.channel.name(),
                        key = %envelope.key,
                        attempt,
                        "Notification delivered"
                    );
                    return Ok(DispatchReceipt {
                        key: envelope.key,
                        attempts: attempt,
                    });
                }
                Err(e) if attempt >= max_attempts || !e.is_transient() => {
                    return Err(DispatchError::Exhausted {
                        key: envelope.key,
                        channel: self.channel.name().to_string(),
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    let backoff = self.policy.backoff(attempt);
                    warn!(
                        channel = self.channel.name(),
                        attempt,
                        max_attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Notification attempt failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl ChannelError {
    /// Whether another attempt could succeed.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::NotConfigured(_) | Self::Serialization(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::MemoryChannel;
    use async_trait::async_trait;

    struct HangingChannel;

    #[async_trait]
    impl NotifyChannel for HangingChannel {
        fn name(&self) -> &'static str {
            "hanging"
        }

        async fn send(&self, _envelope: &NotificationEnvelope) -> Result<(), ChannelError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct UnconfiguredChannel;

    #[async_trait]
    impl NotifyChannel for UnconfiguredChannel {
        fn name(&self) -> &'static str {
            "unconfigured"
        }

        async fn send(&self, _envelope: &NotificationEnvelope) -> Result<(), ChannelError> {
            Err(ChannelError::NotConfigured("no url".into()))
        }
    }

    fn request() -> NotificationRequest {
        NotificationRequest::new("db", 1, 0, "Incident opened for service: db")
    }

    #[test]
    fn test_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
        assert_eq!(policy.backoff(4), Duration::from_secs(8));
        assert_eq!(policy.backoff(7), Duration::from_secs(60));
        assert_eq!(policy.backoff(200), Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let channel = Arc::new(MemoryChannel::new());
        channel.fail_next(2);
        let dispatcher = RetryingDispatcher::new(channel.clone(), RetryPolicy::default());

        let start = tokio::time::Instant::now();
        let receipt = dispatcher.dispatch(request()).await.unwrap();

        assert_eq!(receipt.attempts, 3);
        assert_eq!(channel.delivered().len(), 1);
        // 1s + 2s of backoff
        assert!(start.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_max_attempts() {
        let channel = Arc::new(MemoryChannel::new());
        channel.fail_next(10);
        let dispatcher = RetryingDispatcher::new(channel.clone(), RetryPolicy::default());

        let err = dispatcher.dispatch(request()).await.unwrap_err();
        let DispatchError::Exhausted { attempts, .. } = err;
        assert_eq!(attempts, 5);
        assert_eq!(channel.attempts(), 5);
        assert!(channel.delivered().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempt_timeout() {
        let policy = RetryPolicy {
            maximum_attempts: 2,
            ..RetryPolicy::default()
        };
        let dispatcher = RetryingDispatcher::new(Arc::new(HangingChannel), policy);

        let start = tokio::time::Instant::now();
        let err = dispatcher.dispatch(request()).await.unwrap_err();
        let DispatchError::Exhausted { last_error, .. } = err;
        assert!(matches!(last_error, ChannelError::Timeout { timeout_ms: 30_000 }));
        // Two 30s attempts and one 1s backoff
        assert!(start.elapsed() >= Duration::from_secs(61));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_not_retried() {
        let dispatcher =
            RetryingDispatcher::new(Arc::new(UnconfiguredChannel), RetryPolicy::default());

        let err = dispatcher.dispatch(request()).await.unwrap_err();
        let DispatchError::Exhausted { attempts, .. } = err;
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn test_redelivery_is_idempotent() {
        let channel = Arc::new(MemoryChannel::new());
        let dispatcher = RetryingDispatcher::new(channel.clone(), RetryPolicy::default());

        let first = dispatcher.dispatch(request()).await.unwrap();
        let second = dispatcher.dispatch(request()).await.unwrap();

        assert_eq!(first.key, second.key);
        assert_eq!(channel.delivered().len(), 1);
        assert_eq!(channel.duplicates_suppressed(), 1);
    }
}
