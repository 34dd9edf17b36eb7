//! Client side of a running incident

use tokio::sync::{mpsc, oneshot, watch};
use tracing::debug;

use crate::error::{IncidentError, IncidentResult};
use crate::incident::{instance_id, Command, IncidentState, ServiceId};

/// A command travelling to the loop, with an optional commit receipt.
#[derive(Debug)]
pub(crate) struct Delivery {
    pub command: Command,
    pub reply: Option<oneshot::Sender<IncidentState>>,
}

/// Senders for the three command channels.
#[derive(Debug, Clone)]
pub(crate) struct CommandSenders {
    pub add_alert: mpsc::Sender<Delivery>,
    pub ack: mpsc::Sender<Delivery>,
    pub resolve: mpsc::Sender<Delivery>,
}

impl CommandSenders {
    fn for_command(&self, command: &Command) -> &mpsc::Sender<Delivery> {
        match command {
            Command::AddAlert { .. } => &self.add_alert,
            Command::Ack { .. } => &self.ack,
            Command::Resolve { .. } => &self.resolve,
        }
    }
}

/// Cloneable handle to one incident instance.
///
/// Commands are validated here, before they reach the loop. Queries read
/// the last committed snapshot and never wait on the loop.
#[derive(Debug, Clone)]
pub struct IncidentHandle {
    service: ServiceId,
    senders: CommandSenders,
    state: watch::Receiver<IncidentState>,
}

impl IncidentHandle {
    pub(crate) fn new(
        service: ServiceId,
        senders: CommandSenders,
        state: watch::Receiver<IncidentState>,
    ) -> Self {
        Self {
            service,
            senders,
            state,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Stable instance identifier, `incident-{service}`.
    pub fn instance_id(&self) -> String {
        instance_id(&self.service)
    }

    /// Queue an alert for the incident.
    pub async fn add_alert(&self, alert_id: impl Into<String>) -> IncidentResult<()> {
        self.send(Command::AddAlert {
            alert_id: alert_id.into(),
        })
        .await
    }

    /// Queue an acknowledgement.
    pub async fn ack(&self, responder: impl Into<String>) -> IncidentResult<()> {
        self.send(Command::Ack {
            responder: responder.into(),
        })
        .await
    }

    /// Queue a resolution.
    pub async fn resolve(&self, responder: impl Into<String>) -> IncidentResult<()> {
        self.send(Command::Resolve {
            responder: responder.into(),
        })
        .await
    }

    /// Validate and enqueue a command without waiting for it to be applied.
    pub async fn send(&self, command: Command) -> IncidentResult<()> {
        self.deliver(command, None).await
    }

    /// Validate and enqueue a command, then wait until the loop has
    /// committed it. Returns the state right after that commit.
    ///
    /// Fails with [`IncidentError::Terminated`] if the incident resolves
    /// before the command is consumed.
    pub async fn execute(&self, command: Command) -> IncidentResult<IncidentState> {
        let (tx, rx) = oneshot::channel();
        self.deliver(command, Some(tx)).await?;
        rx.await.map_err(|_| IncidentError::terminated(&self.service))
    }

    async fn deliver(
        &self,
        command: Command,
        reply: Option<oneshot::Sender<IncidentState>>,
    ) -> IncidentResult<()> {
        command.validate()?;
        if self.is_terminated() {
            return Err(IncidentError::terminated(&self.service));
        }

        let channel = command.channel();
        self.senders
            .for_command(&command)
            .send(Delivery { command, reply })
            .await
            .map_err(|_| IncidentError::terminated(&self.service))?;
        debug!(service = %self.service, channel, "Command queued");
        Ok(())
    }

    /// Snapshot of the last committed state.
    pub fn query(&self) -> IncidentState {
        self.state.borrow().clone()
    }

    /// Whether the incident has reached RESOLVED.
    pub fn is_terminated(&self) -> bool {
        self.state.borrow().is_resolved()
    }

    /// Wait until the incident is resolved and return its final state.
    pub async fn wait_resolved(&self) -> IncidentState {
        let mut state = self.state.clone();
        if let Ok(final_state) = state.wait_for(IncidentState::is_resolved).await {
            return final_state.clone();
        }
        // Loop stopped without resolving; report what it last committed.
        let last = state.borrow().clone();
        last
    }
}
