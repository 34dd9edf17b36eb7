//! Incident error types
//!
//! Errors surfaced to the issuer of a command or a start request. Failures
//! that happen inside an event's handling (notification delivery, stale
//! timers) never show up here; they are contained in the event loop.

use thiserror::Error;

/// Result type alias for incident operations
pub type IncidentResult<T> = Result<T, IncidentError>;

/// Errors that can occur while talking to an incident
#[derive(Error, Debug)]
pub enum IncidentError {
    /// Command rejected at the boundary; it never reached the loop
    #[error("Invalid {channel} command: {message}")]
    InvalidCommand { channel: String, message: String },

    /// No incident has ever been started for this service
    #[error("No incident found for service {service}")]
    NotFound { service: String },

    /// The incident already reached RESOLVED and accepts no more events
    #[error("Incident for service {service} is resolved and accepts no further events")]
    Terminated { service: String },

    /// Incident startup could not complete
    #[error("Failed to start incident for service {service}: {message}")]
    Setup { service: String, message: String },
}

impl IncidentError {
    /// Create an invalid command error
    pub fn invalid_command(channel: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCommand {
            channel: channel.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(service: impl Into<String>) -> Self {
        Self::NotFound {
            service: service.into(),
        }
    }

    /// Create a terminated instance error
    pub fn terminated(service: impl Into<String>) -> Self {
        Self::Terminated {
            service: service.into(),
        }
    }

    /// Create a setup error
    pub fn setup(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Setup {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Machine-readable error code, used in worker replies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidCommand { .. } => "INVALID_COMMAND",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Terminated { .. } => "TERMINATED",
            Self::Setup { .. } => "SETUP_FAILED",
        }
    }
}
