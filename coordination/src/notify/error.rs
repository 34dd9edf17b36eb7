//! Error types for notification dispatch.

use thiserror::Error;

/// Errors a single delivery attempt can fail with.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Endpoint answered with a non-success status
    #[error("Endpoint returned status {status}")]
    Status { status: u16 },

    /// Channel is not configured
    #[error("Channel not configured: {0}")]
    NotConfigured(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempt exceeded the per-attempt timeout
    #[error("Attempt timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Error returned once the retry policy is used up.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Notification {key} not delivered via {channel} after {attempts} attempts: {last_error}")]
    Exhausted {
        key: String,
        channel: String,
        attempts: u32,
        last_error: ChannelError,
    },
}
