//! Event log and replay for incident recovery
//!
//! Every event an incident loop consumes is appended to its log before the
//! state machine sees it. After a crash the log is folded back through the
//! machine to rebuild the exact committed state.
//!
//! # Architecture
//!
//! 1. **Record Types** (`types.rs`): the [`LogEntry`] variants and the
//!    sequenced [`LogRecord`] written per event.
//!
//! 2. **Event Log** (`log.rs`): the [`EventLog`] trait with in-memory and
//!    JSON-lines backends, plus the per-service [`LogStore`].
//!
//! 3. **Event History** (`history.rs`): replay of a recorded log into an
//!    [`IncidentMachine`](crate::incident::IncidentMachine).
//!
//! # Event Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//! │ Command/Timer│────▶│  Event Log   │────▶│   Machine    │
//! │  (consumed)  │     │   (append)   │     │   (apply)    │
//! └──────────────┘     └──────┬───────┘     └──────────────┘
//!                             │ restart
//!                             ▼
//!                      ┌──────────────┐
//!                      │ EventHistory │
//!                      │   (replay)   │
//!                      └──────────────┘
//! ```

pub mod history;
pub mod log;
pub mod types;

pub use history::{EventHistory, HistoryError, HistoryResult, ReplayStats, Replayed};
pub use log::{EventLog, JsonlEventLog, LogStore, MemoryEventLog, StoreError, StoreResult};
pub use types::{LogEntry, LogRecord, Sequence};
