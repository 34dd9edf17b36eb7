//! Incident Coordination Library
//!
//! This library provides:
//! - A deterministic state machine for one incident per service
//!   (OPEN → ACKED → RESOLVED) with automatic escalation while unacknowledged
//! - An append-only event log with replay, so a restarted process resumes
//!   every unresolved incident exactly where it left off
//! - Retrying, idempotent notification dispatch over pluggable channels
//!
//! # Features
//!
//! ## Commands
//! - `add-alert`: Append an alert id to the incident
//! - `ack`: Acknowledge an OPEN incident (first ack wins)
//! - `resolve`: Resolve the incident and end its event loop
//!
//! ## Queries
//! - `state`: Snapshot of the incident's durable state
//!
//! # Usage
//!
//! ```ignore
//! use incident_coordination::{IncidentConfig, IncidentRegistry};
//!
//! let registry = IncidentRegistry::new(IncidentConfig::from_env()?);
//! registry.recover().await?;
//! let incident = registry.start("payments").await?;
//! incident.add_alert("a1").await?;
//! incident.ack("alice").await?;
//! println!("{:?}", incident.query());
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod config;
pub mod error;
pub mod escalation;
pub mod events;
pub mod incident;
pub mod notify;
pub mod runtime;

// Re-export key incident types
pub use config::{ConfigError, IncidentConfig};
pub use error::{IncidentError, IncidentResult};
pub use incident::{
    instance_id, Command, IncidentEvent, IncidentMachine, IncidentState, IncidentStatus,
    ServiceId, TransitionError,
};

// Re-export runtime types
pub use runtime::{IncidentHandle, IncidentRegistry};

// Re-export event log types
pub use events::{EventHistory, EventLog, JsonlEventLog, LogStore, MemoryEventLog, Replayed};

// Re-export notification types
pub use notify::{
    ChannelError, DispatchError, LogChannel, MemoryChannel, NotificationRequest, NotifyChannel,
    RetryPolicy, RetryingDispatcher, WebhookChannel,
};
