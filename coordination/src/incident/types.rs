//! Incident data model: durable state, lifecycle status and inbound commands.

use serde::{Deserialize, Serialize};

use crate::error::{IncidentError, IncidentResult};

/// Service identifier an incident is keyed by
pub type ServiceId = String;

/// Lifecycle status of an incident.
///
/// Status only ever advances: `Open → Acked → Resolved` or `Open → Resolved`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    /// Raised and waiting for a responder.
    Open,
    /// A responder has taken ownership.
    Acked,
    /// Terminal: no further events are accepted.
    Resolved,
}

impl IncidentStatus {
    /// Whether this is the terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Resolved)
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Acked => write!(f, "ACKED"),
            Self::Resolved => write!(f, "RESOLVED"),
        }
    }
}

/// The durable state of one incident.
///
/// This is also the payload of the `state` query; callers always receive
/// a value copy of the last committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncidentState {
    /// Service the incident belongs to (immutable)
    pub service: ServiceId,
    /// Current lifecycle status
    pub status: IncidentStatus,
    /// Alert identifiers in arrival order (append-only, duplicates allowed)
    pub alerts: Vec<String>,
    /// Number of escalations applied while open
    pub escalation_level: u32,
    /// Responder that acknowledged the incident
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acked_by: Option<String>,
    /// Responder that resolved the incident
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_by: Option<String>,
}

impl IncidentState {
    /// Fresh state for a newly opened incident.
    pub fn open(service: impl Into<ServiceId>) -> Self {
        Self {
            service: service.into(),
            status: IncidentStatus::Open,
            alerts: Vec::new(),
            escalation_level: 0,
            acked_by: None,
            resolved_by: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == IncidentStatus::Open
    }

    pub fn is_resolved(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Commands accepted by a running incident.
///
/// Commands are delivered at-least-once, so every variant must be safe to
/// apply twice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    /// Attach another alert occurrence to the incident
    AddAlert { alert_id: String },
    /// Take ownership of the incident
    Ack { responder: String },
    /// Close the incident
    Resolve { responder: String },
}

impl Command {
    /// Wire name of the channel this command is delivered on.
    pub fn channel(&self) -> &'static str {
        match self {
            Self::AddAlert { .. } => "add-alert",
            Self::Ack { .. } => "ack",
            Self::Resolve { .. } => "resolve",
        }
    }

    /// Reject commands with missing required fields.
    ///
    /// Runs at the intake boundary, before a command can reach the loop.
    pub fn validate(&self) -> IncidentResult<()> {
        let (field, value) = match self {
            Self::AddAlert { alert_id } => ("alert_id", alert_id),
            Self::Ack { responder } | Self::Resolve { responder } => ("responder", responder),
        };
        if value.trim().is_empty() {
            return Err(IncidentError::invalid_command(
                self.channel(),
                format!("{field} must not be empty"),
            ));
        }
        Ok(())
    }
}

/// Validate a service identifier at the intake boundary.
pub fn validate_service(service: &str) -> IncidentResult<()> {
    if service.trim().is_empty() {
        return Err(IncidentError::invalid_command(
            "start",
            "service must not be empty",
        ));
    }
    Ok(())
}

/// Instance identifier used for addressing an incident of a service.
pub fn instance_id(service: &str) -> String {
    format!("incident-{}", service)
}
