//! Event log record types
//!
//! Every event an incident consumes is recorded before it is applied. The
//! ordered records are the source of truth for replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::escalation::TimerTicket;
use crate::incident::{Command, IncidentEvent, ServiceId};

/// Position of a record in an incident's log
pub type Sequence = u64;

/// Entries recorded in an incident's event log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEntry {
    /// The incident was started (always the first record)
    Opened { service: ServiceId },

    /// A command was consumed from a command channel
    Command { command: Command },

    /// An escalation timer fired and was consumed
    TimerFired { ticket: TimerTicket },
}

impl LogEntry {
    /// Get the entry type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            LogEntry::Opened { .. } => "opened",
            LogEntry::Command { .. } => "command",
            LogEntry::TimerFired { .. } => "timer_fired",
        }
    }

    /// The loop event this entry records, if any
    pub fn as_event(&self) -> Option<IncidentEvent> {
        match self {
            LogEntry::Opened { .. } => None,
            LogEntry::Command { command } => Some(IncidentEvent::Command(command.clone())),
            LogEntry::TimerFired { ticket } => Some(IncidentEvent::TimerFired(*ticket)),
        }
    }
}

impl From<&IncidentEvent> for LogEntry {
    fn from(event: &IncidentEvent) -> Self {
        match event {
            IncidentEvent::Command(command) => LogEntry::Command {
                command: command.clone(),
            },
            IncidentEvent::TimerFired(ticket) => LogEntry::TimerFired { ticket: *ticket },
        }
    }
}

/// A persisted log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Zero-based, gap-free position in the log
    pub seq: Sequence,
    /// When the record was written; informational only
    pub recorded_at: DateTime<Utc>,
    /// The recorded entry
    pub entry: LogEntry,
}

impl LogRecord {
    pub fn new(seq: Sequence, entry: LogEntry) -> Self {
        Self {
            seq,
            recorded_at: Utc::now(),
            entry,
        }
    }
}
