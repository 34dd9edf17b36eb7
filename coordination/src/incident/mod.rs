//! Incident lifecycle core
//!
//! - `types.rs`: the durable [`IncidentState`], its status and the
//!   [`Command`] variants delivered on the command channels.
//! - `machine.rs`: the deterministic [`IncidentMachine`] that applies one
//!   [`IncidentEvent`] at a time and reports the resulting notifications.

pub mod machine;
pub mod types;

pub use machine::{
    IncidentEvent, IncidentMachine, Transition, TransitionError, TransitionOutcome,
};
pub use types::{
    instance_id, validate_service, Command, IncidentState, IncidentStatus, ServiceId,
};
