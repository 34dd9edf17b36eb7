//! Incident event loop
//!
//! One tokio task per incident. Each iteration:
//!
//! ```text
//! arm timer if policy says so
//!     │
//!     ▼
//! wait (biased): add-alert > ack > resolve > timer
//!     │
//!     ▼
//! append to event log ──fail──▶ stop before applying
//!     │
//!     ▼
//! apply to machine, publish snapshot, answer commit receipt
//!     │
//!     ▼
//! dispatch notifications (failures logged, never fed back)
//! ```
//!
//! Notifications left over from before a restart go out first, under their
//! original dedup keys.
//!
//! The loop ends once the incident is RESOLVED. Timers are spawned sleeps
//! that cannot be cancelled; a superseded timer still fires and is
//! discarded by the machine as stale.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::handle::{CommandSenders, Delivery, IncidentHandle};
use crate::escalation::TimerTicket;
use crate::events::{EventLog, LogEntry, Sequence};
use crate::incident::{IncidentEvent, IncidentMachine, IncidentState};
use crate::notify::{NotificationRequest, RetryingDispatcher};

/// Capacity of each command channel
const COMMAND_CAPACITY: usize = 256;

/// How an instance came to life
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Startup {
    /// New incident; the opened notification goes out first
    Fresh,
    /// Rebuilt from a persisted log
    Resumed,
}

struct CommandReceivers {
    add_alert: mpsc::Receiver<Delivery>,
    ack: mpsc::Receiver<Delivery>,
    resolve: mpsc::Receiver<Delivery>,
}

/// Event loop state for one incident.
pub(crate) struct IncidentLoop {
    machine: IncidentMachine,
    log: Box<dyn EventLog>,
    dispatcher: Arc<RetryingDispatcher>,
    commands: CommandReceivers,
    timer_tx: mpsc::UnboundedSender<TimerTicket>,
    timer_rx: mpsc::UnboundedReceiver<TimerTicket>,
    state_tx: watch::Sender<IncidentState>,
    startup: Startup,
    pending: Vec<NotificationRequest>,
}

impl IncidentLoop {
    /// Wire up a loop and the handle that talks to it.
    pub(crate) fn new(
        machine: IncidentMachine,
        log: Box<dyn EventLog>,
        dispatcher: Arc<RetryingDispatcher>,
        startup: Startup,
        pending: Vec<NotificationRequest>,
    ) -> (Self, IncidentHandle) {
        let (add_alert_tx, add_alert) = mpsc::channel(COMMAND_CAPACITY);
        let (ack_tx, ack) = mpsc::channel(COMMAND_CAPACITY);
        let (resolve_tx, resolve) = mpsc::channel(COMMAND_CAPACITY);
        let (timer_tx, timer_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(machine.snapshot());

        let handle = IncidentHandle::new(
            machine.state().service.clone(),
            CommandSenders {
                add_alert: add_alert_tx,
                ack: ack_tx,
                resolve: resolve_tx,
            },
            state_rx,
        );

        let incident = Self {
            machine,
            log,
            dispatcher,
            commands: CommandReceivers {
                add_alert,
                ack,
                resolve,
            },
            timer_tx,
            timer_rx,
            state_tx,
            startup,
            pending,
        };
        (incident, handle)
    }

    /// Run until RESOLVED (or until the log can no longer be written).
    /// Returns the final committed state.
    pub(crate) async fn run(mut self) -> IncidentState {
        let service = self.machine.state().service.clone();

        let pending = std::mem::take(&mut self.pending);
        if !pending.is_empty() {
            info!(
                service = %service,
                count = pending.len(),
                "Re-sending notifications recorded before restart"
            );
        }
        for request in pending {
            self.dispatch(request).await;
        }

        match self.startup {
            Startup::Fresh => {
                info!(service = %service, "Incident opened");
                let request = self.machine.opened_notification(0);
                self.dispatch(request).await;
            }
            Startup::Resumed => {
                info!(
                    service = %service,
                    status = %self.machine.state().status,
                    level = self.machine.state().escalation_level,
                    "Incident resumed from event log"
                );
                // The pre-crash sleep is gone; wait a full interval again.
                if let Some(ticket) = self.machine.timer().outstanding() {
                    self.spawn_timer(ticket);
                }
            }
        }

        while !self.machine.is_terminal() {
            if let Some(ticket) = self.machine.arm_timer() {
                self.spawn_timer(ticket);
            }

            let (event, reply) = self.next_event().await;

            let record = match self.log.append(LogEntry::from(&event)) {
                Ok(record) => record,
                Err(e) => {
                    error!(
                        service = %service,
                        event = event.label(),
                        error = %e,
                        "Failed to record event, stopping incident loop"
                    );
                    break;
                }
            };

            let transition = match self.machine.apply(record.seq, &event) {
                Ok(transition) => transition,
                Err(e) => {
                    warn!(service = %service, error = %e, "Event rejected");
                    break;
                }
            };
            debug!(
                service = %service,
                seq = record.seq,
                outcome = ?transition.outcome,
                "Event applied"
            );

            let snapshot = self.machine.snapshot();
            self.state_tx.send_replace(snapshot.clone());
            if let Some(reply) = reply {
                // Caller may have stopped waiting.
                let _ = reply.send(snapshot);
            }

            for request in transition.notifications {
                self.dispatch(request).await;
            }
        }

        if self.machine.is_terminal() {
            info!(
                service = %service,
                events = self.machine.applied(),
                "Incident loop finished"
            );
        }
        self.machine.snapshot()
    }

    /// Wait for the next event. Ties between ready sources are broken by
    /// declaration order.
    async fn next_event(&mut self) -> (IncidentEvent, Option<oneshot::Sender<IncidentState>>) {
        let delivery = tokio::select! {
            biased;
            Some(delivery) = self.commands.add_alert.recv() => delivery,
            Some(delivery) = self.commands.ack.recv() => delivery,
            Some(delivery) = self.commands.resolve.recv() => delivery,
            Some(ticket) = self.timer_rx.recv() => {
                return (IncidentEvent::TimerFired(ticket), None);
            }
        };
        let Delivery { command, reply } = delivery;
        (IncidentEvent::Command(command), reply)
    }

    fn spawn_timer(&self, ticket: TimerTicket) {
        let deadline = Instant::now() + self.machine.escalation_interval();
        let tx = self.timer_tx.clone();
        debug!(
            service = %self.machine.state().service,
            %ticket,
            after_ms = duration_ms(self.machine.escalation_interval()),
            "Escalation timer armed"
        );
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            // Loop already gone after RESOLVED.
            let _ = tx.send(ticket);
        });
    }

    async fn dispatch(&self, request: NotificationRequest) {
        let sequence: Sequence = request.sequence;
        if let Err(e) = self.dispatcher.dispatch(request).await {
            warn!(
                service = %self.machine.state().service,
                channel = self.dispatcher.channel_name(),
                seq = sequence,
                error = %e,
                "Notification dropped after retries"
            );
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    duration.as_millis().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{LogRecord, MemoryEventLog, StoreError, StoreResult};
    use crate::incident::{Command, IncidentStatus};
    use crate::notify::{MemoryChannel, RetryPolicy};

    const INTERVAL: Duration = Duration::from_secs(30);

    /// Log that refuses every write
    struct ReadOnlyLog;

    impl EventLog for ReadOnlyLog {
        fn append(&mut self, _entry: LogEntry) -> StoreResult<LogRecord> {
            Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "read-only",
            )))
        }

        fn records(&self) -> StoreResult<Vec<LogRecord>> {
            Ok(Vec::new())
        }

        fn next_seq(&self) -> Sequence {
            1
        }
    }

    fn dispatcher() -> (Arc<RetryingDispatcher>, Arc<MemoryChannel>) {
        let channel = Arc::new(MemoryChannel::new());
        let dispatcher = Arc::new(RetryingDispatcher::new(
            channel.clone(),
            RetryPolicy::default(),
        ));
        (dispatcher, channel)
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_failure_stops_loop_before_applying() {
        let (dispatcher, _) = dispatcher();
        let machine = IncidentMachine::open("db", INTERVAL);
        let (incident, handle) = IncidentLoop::new(
            machine,
            Box::new(ReadOnlyLog),
            dispatcher,
            Startup::Fresh,
            Vec::new(),
        );
        let task = tokio::spawn(incident.run());

        handle.add_alert("a1").await.unwrap();
        let final_state = task.await.unwrap();
        assert!(final_state.alerts.is_empty());

        // The loop is gone without resolving; the last commit is reported.
        let state = handle.wait_resolved().await;
        assert_eq!(state.status, IncidentStatus::Open);
        assert!(state.alerts.is_empty());
        assert!(matches!(
            handle
                .execute(Command::Ack {
                    responder: "carol".into()
                })
                .await,
            Err(crate::error::IncidentError::Terminated { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_notifications_sent_before_new_ones() {
        let (dispatcher, channel) = dispatcher();
        let machine = IncidentMachine::open("db", INTERVAL);
        let leftover = IncidentMachine::open("db", INTERVAL).opened_notification(0);
        let (incident, handle) = IncidentLoop::new(
            machine,
            Box::new(MemoryEventLog::new()),
            dispatcher,
            Startup::Resumed,
            vec![leftover],
        );
        tokio::spawn(incident.run());

        handle
            .execute(Command::Resolve {
                responder: "bob".into(),
            })
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            channel.messages(),
            vec!["Incident opened for service: db", "Incident resolved by bob"]
        );
    }
}
