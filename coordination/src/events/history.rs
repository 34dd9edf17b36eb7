//! Event history and replay
//!
//! Replay folds an incident's recorded events through the state machine,
//! in log order, exactly as the live loop applied them: arm the escalation
//! timer if the policy calls for it, then apply the next event. No
//! notifications are dispatched during replay.
//!
//! The loop finishes dispatching an event's notifications before it consumes
//! the next event, so only the last recorded event can have notifications
//! that never went out. Replay hands those back as [`Replayed::pending`].

use std::time::Duration;

use tracing::{debug, info};

use super::types::{LogEntry, LogRecord, Sequence};
use crate::incident::{IncidentMachine, ServiceId, TransitionError, TransitionOutcome};
use crate::notify::NotificationRequest;

/// Error type for history operations
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("Event log is empty")]
    Empty,

    #[error("Event log must start with an opened record, found {found}")]
    MissingOpen { found: &'static str },

    #[error("Event log belongs to service {found}, expected {expected}")]
    ServiceMismatch { expected: String, found: String },

    #[error("Unexpected {found} record at seq {seq}")]
    UnexpectedRecord { seq: Sequence, found: &'static str },

    #[error("Transition failed at seq {seq}: {source}")]
    Transition {
        seq: Sequence,
        #[source]
        source: TransitionError,
    },
}

/// Result type for history operations
pub type HistoryResult<T> = Result<T, HistoryError>;

/// Statistics gathered while folding a log
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    pub total_events: usize,
    pub commands: usize,
    pub timer_fires: usize,
    pub escalations: usize,
    pub stale_timers: usize,
    pub ignored_acks: usize,
}

impl ReplayStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, entry: &LogEntry, outcome: &TransitionOutcome) {
        self.total_events += 1;
        match entry {
            LogEntry::Command { .. } => self.commands += 1,
            LogEntry::TimerFired { .. } => self.timer_fires += 1,
            LogEntry::Opened { .. } => {}
        }
        match outcome {
            TransitionOutcome::Escalated { .. } => self.escalations += 1,
            TransitionOutcome::StaleTimer { .. } => self.stale_timers += 1,
            TransitionOutcome::AckIgnored { .. } => self.ignored_acks += 1,
            _ => {}
        }
    }
}

/// A machine rebuilt from its log
#[derive(Debug, Clone)]
pub struct Replayed {
    pub machine: IncidentMachine,
    pub stats: ReplayStats,
    /// Sequence number the next live event will be recorded under
    pub next_seq: Sequence,
    /// Notifications of the last recorded event, possibly never delivered
    pub pending: Vec<NotificationRequest>,
}

/// Recorded history of one incident
pub struct EventHistory {
    records: Vec<LogRecord>,
}

impl EventHistory {
    pub fn new(records: Vec<LogRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Service named by the opening record.
    pub fn service(&self) -> HistoryResult<&str> {
        match self.records.first().map(|r| &r.entry) {
            None => Err(HistoryError::Empty),
            Some(LogEntry::Opened { service }) => Ok(service),
            Some(other) => Err(HistoryError::MissingOpen {
                found: other.event_type(),
            }),
        }
    }

    /// Fold the history, checking it belongs to `expected` service.
    pub fn replay_for(&self, expected: &str, interval: Duration) -> HistoryResult<Replayed> {
        let service = self.service()?;
        if service != expected {
            return Err(HistoryError::ServiceMismatch {
                expected: expected.to_string(),
                found: service.to_string(),
            });
        }
        self.replay(interval)
    }

    /// Fold every recorded event through a fresh machine.
    pub fn replay(&self, interval: Duration) -> HistoryResult<Replayed> {
        let service: ServiceId = self.service()?.to_string();
        let opened_at_ms = self.records[0].recorded_at.timestamp_millis();
        let mut machine = IncidentMachine::open(&service, interval).with_opened_at(opened_at_ms);
        let mut stats = ReplayStats::new();
        let mut pending = vec![machine.opened_notification(0)];

        for record in &self.records[1..] {
            let Some(event) = record.entry.as_event() else {
                return Err(HistoryError::UnexpectedRecord {
                    seq: record.seq,
                    found: record.entry.event_type(),
                });
            };

            machine.arm_timer();
            let transition = machine
                .apply(record.seq, &event)
                .map_err(|source| HistoryError::Transition {
                    seq: record.seq,
                    source,
                })?;
            stats.record(&record.entry, &transition.outcome);
            pending = transition.notifications;
            debug!(seq = record.seq, event = event.label(), "Replayed event");
        }

        info!(
            service = %service,
            total = stats.total_events,
            escalations = stats.escalations,
            status = %machine.state().status,
            "Event replay complete"
        );

        Ok(Replayed {
            machine,
            stats,
            next_seq: self.records.len() as Sequence,
            pending,
        })
    }
}
