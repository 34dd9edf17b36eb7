//! Incident State Machine: deterministic transition function
//!
//! Applies one event at a time to the durable [`IncidentState`] and reports
//! which notifications the transition produced. The machine never reads the
//! wall clock, never sleeps and never performs I/O, so folding the same
//! ordered event sequence always yields the same state.
//!
//! ```text
//!            Ack (first)              Resolve
//!   OPEN ─────────────────▶ ACKED ─────────────────▶ RESOLVED
//!    │ ▲                                                ▲
//!    │ └─ timer fire: level += 1, rearm                 │
//!    └──────────────────────── Resolve ─────────────────┘
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use super::types::{Command, IncidentState, IncidentStatus};
use crate::escalation::{EscalationTimer, FireVerdict, StaleReason, TimerTicket};
use crate::notify::NotificationRequest;

/// An event consumed by the incident loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IncidentEvent {
    /// A command delivered on one of the command channels
    Command(Command),
    /// An escalation timer fired
    TimerFired(TimerTicket),
}

impl IncidentEvent {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Command(cmd) => cmd.channel(),
            Self::TimerFired(_) => "timer",
        }
    }
}

/// What a transition did to the state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionOutcome {
    AlertAdded { alert_id: String },
    Acknowledged { responder: String },
    Resolved { responder: String },
    Escalated { level: u32 },
    /// Ack received while not OPEN
    AckIgnored { status: IncidentStatus },
    /// Timer fired after its guard changed
    StaleTimer { reason: StaleReason },
}

impl TransitionOutcome {
    /// Whether the state was left untouched.
    pub fn is_noop(&self) -> bool {
        matches!(self, Self::AckIgnored { .. } | Self::StaleTimer { .. })
    }
}

/// Result of applying one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub outcome: TransitionOutcome,
    /// Notifications to dispatch, in order
    pub notifications: Vec<NotificationRequest>,
}

impl Transition {
    fn quiet(outcome: TransitionOutcome) -> Self {
        Self {
            outcome,
            notifications: Vec::new(),
        }
    }

    fn notify(outcome: TransitionOutcome, request: NotificationRequest) -> Self {
        Self {
            outcome,
            notifications: vec![request],
        }
    }
}

/// Error raised when an event targets a resolved incident.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Incident for service {service} is resolved; {event} event rejected")]
    Terminal { service: String, event: &'static str },
}

/// Deterministic state machine for one incident.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncidentMachine {
    state: IncidentState,
    timer: EscalationTimer,
    escalation_interval: Duration,
    opened_at_ms: i64,
    applied: u64,
}

impl IncidentMachine {
    /// Create the machine for a newly opened incident.
    pub fn open(service: &str, escalation_interval: Duration) -> Self {
        Self {
            state: IncidentState::open(service),
            timer: EscalationTimer::new(),
            escalation_interval,
            opened_at_ms: 0,
            applied: 0,
        }
    }

    /// Stamp the incident's opening time (unix millis) onto every
    /// notification it produces.
    pub fn with_opened_at(mut self, opened_at_ms: i64) -> Self {
        self.opened_at_ms = opened_at_ms;
        self
    }

    fn request(&self, sequence: u64, level: u32, message: String) -> NotificationRequest {
        NotificationRequest::new(&self.state.service, sequence, level, message)
            .opened_at(self.opened_at_ms)
    }

    /// The one-time "incident opened" notification.
    pub fn opened_notification(&self, sequence: u64) -> NotificationRequest {
        self.request(
            sequence,
            self.state.escalation_level,
            format!("Incident opened for service: {}", self.state.service),
        )
    }

    pub fn state(&self) -> &IncidentState {
        &self.state
    }

    /// Value copy of the committed state.
    pub fn snapshot(&self) -> IncidentState {
        self.state.clone()
    }

    pub fn timer(&self) -> &EscalationTimer {
        &self.timer
    }

    pub fn escalation_interval(&self) -> Duration {
        self.escalation_interval
    }

    /// Number of events applied so far, no-ops included.
    pub fn applied(&self) -> u64 {
        self.applied
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_resolved()
    }

    /// Arm the escalation timer if the policy calls for it.
    ///
    /// Called once at the start of every loop iteration, before waiting.
    pub fn arm_timer(&mut self) -> Option<TimerTicket> {
        self.timer.arm(self.state.status)
    }

    /// Apply one event, tagged with its log sequence number.
    pub fn apply(
        &mut self,
        sequence: u64,
        event: &IncidentEvent,
    ) -> Result<Transition, TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal {
                service: self.state.service.clone(),
                event: event.label(),
            });
        }

        let transition = match event {
            IncidentEvent::Command(Command::AddAlert { alert_id }) => {
                self.add_alert(sequence, alert_id)
            }
            IncidentEvent::Command(Command::Ack { responder }) => self.ack(sequence, responder),
            IncidentEvent::Command(Command::Resolve { responder }) => {
                self.resolve(sequence, responder)
            }
            IncidentEvent::TimerFired(ticket) => self.timer_fired(sequence, *ticket),
        };

        self.applied += 1;
        Ok(transition)
    }

    fn add_alert(&mut self, sequence: u64, alert_id: &str) -> Transition {
        self.state.alerts.push(alert_id.to_string());
        info!(service = %self.state.service, alert_id, "Alert added to incident");

        let request = self.request(
            sequence,
            self.state.escalation_level,
            format!("New alert added to incident: {}", alert_id),
        )
        .with_alert(alert_id);
        Transition::notify(
            TransitionOutcome::AlertAdded {
                alert_id: alert_id.to_string(),
            },
            request,
        )
    }

    fn ack(&mut self, sequence: u64, responder: &str) -> Transition {
        if self.state.status != IncidentStatus::Open {
            debug!(
                service = %self.state.service,
                responder,
                status = %self.state.status,
                "Ack ignored, incident not open"
            );
            return Transition::quiet(TransitionOutcome::AckIgnored {
                status: self.state.status,
            });
        }

        self.state.status = IncidentStatus::Acked;
        self.state.acked_by = Some(responder.to_string());
        self.timer.on_status_change();
        info!(service = %self.state.service, responder, "Incident acknowledged");

        let request = self.request(
            sequence,
            self.state.escalation_level,
            format!("Incident acknowledged by {}", responder),
        )
        .with_responder(responder);
        Transition::notify(
            TransitionOutcome::Acknowledged {
                responder: responder.to_string(),
            },
            request,
        )
    }

    fn resolve(&mut self, sequence: u64, responder: &str) -> Transition {
        let from = self.state.status;
        self.state.status = IncidentStatus::Resolved;
        self.state.resolved_by = Some(responder.to_string());
        self.timer.on_status_change();
        info!(service = %self.state.service, responder, from = %from, "Incident resolved");

        let request = self.request(
            sequence,
            self.state.escalation_level,
            format!("Incident resolved by {}", responder),
        )
        .with_responder(responder);
        Transition::notify(
            TransitionOutcome::Resolved {
                responder: responder.to_string(),
            },
            request,
        )
    }

    fn timer_fired(&mut self, sequence: u64, ticket: TimerTicket) -> Transition {
        match self.timer.on_fire(ticket, self.state.status) {
            FireVerdict::Stale(reason) => {
                debug!(service = %self.state.service, %ticket, ?reason, "Stale escalation timer discarded");
                Transition::quiet(TransitionOutcome::StaleTimer { reason })
            }
            FireVerdict::Escalate => {
                self.state.escalation_level += 1;
                let level = self.state.escalation_level;
                info!(service = %self.state.service, level, "Escalating incident");

                let request = self.request(
                    sequence,
                    level,
                    format!(
                        "ESCALATION: Incident not acknowledged after {}, escalating to level {}",
                        format_interval(self.escalation_interval),
                        level
                    ),
                );
                Transition::notify(TransitionOutcome::Escalated { level }, request)
            }
        }
    }
}

/// Render an interval the way operators write it (`30s`, `1500ms`).
fn format_interval(interval: Duration) -> String {
    if interval.subsec_millis() == 0 {
        format!("{}s", interval.as_secs())
    } else {
        format!("{}ms", interval.as_millis())
    }
}
