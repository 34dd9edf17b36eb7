//! Escalation timer policy
//!
//! An OPEN incident always has exactly one escalation timer outstanding.
//! Every arming hands out a [`TimerTicket`] tagged with the current status
//! version; any status change bumps the version, so a timer that was
//! already in flight when the incident was acked or resolved is recognised
//! as stale when it fires and is discarded.
//!
//! ```text
//! OPEN, nothing outstanding ──arm──▶ ticket{id, version}
//!     │
//!     ├─ fire, still OPEN, same version, outstanding → escalate, rearm
//!     └─ fire after ack/resolve                      → stale, ignored
//! ```

pub mod timer;

pub use timer::{EscalationTimer, FireVerdict, StaleReason, TimerTicket};
