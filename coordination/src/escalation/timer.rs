//! Escalation Timer: rearmable, non-cancellable timer bookkeeping
//!
//! The runtime's timer primitive cannot be cancelled: once armed, a timer
//! always fires eventually. Correctness therefore relies on filtering. Every
//! armed timer gets a [`TimerTicket`] tagged with the status version it was
//! issued under; a firing is honoured only if the incident is still open,
//! the status version is unchanged and the ticket is the outstanding one.
//!
//! ```text
//! OPEN, nothing outstanding ──arm──▶ ticket{id: n, version: v}
//!     │
//!     ├─ fires, still OPEN at v  → Escalate (ticket consumed, rearm next iteration)
//!     ├─ Ack/Resolve first        → version v+1, ticket consumed as stale
//!     └─ fires after that         → Stale, discarded
//! ```
//!
//! All counters live in durable state, so a replay of the event log
//! re-derives exactly the same tickets.

use serde::{Deserialize, Serialize};

use crate::incident::IncidentStatus;

/// Identity of one armed escalation timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimerTicket {
    /// Per-incident sequence number of the timer
    pub id: u64,
    /// Status version the timer was armed under
    pub version: u64,
}

impl std::fmt::Display for TimerTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer#{}@v{}", self.id, self.version)
    }
}

/// Why a timer firing was discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StaleReason {
    /// The incident left OPEN while the timer was pending
    NotOpen { status: IncidentStatus },
    /// The status changed since the timer was armed
    VersionMismatch { armed: u64, current: u64 },
    /// The ticket was already consumed (duplicate delivery)
    NotOutstanding,
}

/// Outcome of a timer firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireVerdict {
    /// Valid firing: raise the escalation level
    Escalate,
    /// Stale firing: documented no-op
    Stale(StaleReason),
}

impl FireVerdict {
    pub fn is_stale(&self) -> bool {
        matches!(self, Self::Stale(_))
    }
}

/// Tracks the outstanding escalation timer of one incident.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationTimer {
    next_id: u64,
    version: u64,
    outstanding: Option<TimerTicket>,
}

impl EscalationTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current status version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Ticket of the timer currently pending, if any.
    pub fn outstanding(&self) -> Option<TimerTicket> {
        self.outstanding
    }

    /// Arm iff the incident is open and no timer is outstanding.
    pub fn should_arm(&self, status: IncidentStatus) -> bool {
        status == IncidentStatus::Open && self.outstanding.is_none()
    }

    /// Arm a new timer if the policy allows it, returning its ticket.
    pub fn arm(&mut self, status: IncidentStatus) -> Option<TimerTicket> {
        if !self.should_arm(status) {
            return None;
        }
        let ticket = TimerTicket {
            id: self.next_id,
            version: self.version,
        };
        self.next_id += 1;
        self.outstanding = Some(ticket);
        Some(ticket)
    }

    /// Record a status change. Any pending timer becomes stale.
    pub fn on_status_change(&mut self) {
        self.version += 1;
        self.outstanding = None;
    }

    /// Judge a firing against the current status and consume the ticket.
    pub fn on_fire(&mut self, ticket: TimerTicket, status: IncidentStatus) -> FireVerdict {
        if status != IncidentStatus::Open {
            return FireVerdict::Stale(StaleReason::NotOpen { status });
        }
        if ticket.version != self.version {
            return FireVerdict::Stale(StaleReason::VersionMismatch {
                armed: ticket.version,
                current: self.version,
            });
        }
        if self.outstanding != Some(ticket) {
            return FireVerdict::Stale(StaleReason::NotOutstanding);
        }
        self.outstanding = None;
        FireVerdict::Escalate
    }
}
