//! Instance registry: one live incident per service
//!
//! ```text
//! start(service)
//!   ├─ live, not resolved       → attach to existing handle
//!   ├─ log folds to OPEN/ACKED  → resume from log, re-send last event's notifications
//!   ├─ log folds to RESOLVED    → rotate log aside, fresh incident
//!   └─ nothing on record        → fresh incident
//! ```
//!
//! [`IncidentRegistry::recover`] runs the same resume path for every
//! unresolved log in the state directory, so a restarted process picks up
//! its incidents without waiting for a `start`.
//!
//! A loop that reaches RESOLVED removes itself from the live map. The
//! removal is tagged with the generation it was started under, so a stale
//! teardown never evicts a newer incident for the same service. Final
//! states stay queryable after teardown.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::Mutex;
use tracing::{info, warn};

use super::handle::IncidentHandle;
use super::instance::{IncidentLoop, Startup};
use crate::config::IncidentConfig;
use crate::error::{IncidentError, IncidentResult};
use crate::events::{EventHistory, EventLog, JsonlEventLog, LogEntry, LogStore};
use crate::incident::{validate_service, Command, IncidentMachine, IncidentState, ServiceId};
use crate::notify::{NotificationRequest, RetryingDispatcher};

struct LiveIncident {
    generation: u64,
    handle: IncidentHandle,
}

#[derive(Default)]
struct Incidents {
    live: HashMap<ServiceId, LiveIncident>,
    finished: HashMap<ServiceId, IncidentState>,
    next_generation: u64,
}

struct Inner {
    config: IncidentConfig,
    store: LogStore,
    dispatcher: Arc<RetryingDispatcher>,
    incidents: Mutex<Incidents>,
}

impl Inner {
    async fn teardown(&self, service: &str, generation: u64, final_state: IncidentState) {
        let mut incidents = self.incidents.lock().await;
        let current = incidents
            .live
            .get(service)
            .is_some_and(|live| live.generation == generation);
        if !current {
            return;
        }
        incidents.live.remove(service);
        if final_state.is_resolved() {
            incidents.finished.insert(service.to_string(), final_state);
            info!(service, generation, "Incident torn down");
        } else {
            warn!(service, generation, "Incident loop stopped before resolving");
        }
    }
}

/// Everything a new loop needs
struct Prepared {
    machine: IncidentMachine,
    log: Box<dyn EventLog>,
    startup: Startup,
    /// Notifications from before the restart, sent ahead of anything new
    pending: Vec<NotificationRequest>,
}

fn setup_error(service: &str, e: impl std::fmt::Display) -> IncidentError {
    IncidentError::setup(service, e.to_string())
}

/// Keyed registry of incident instances
#[derive(Clone)]
pub struct IncidentRegistry {
    inner: Arc<Inner>,
}

impl IncidentRegistry {
    /// Registry using the config's own notification channel.
    pub fn new(config: IncidentConfig) -> Self {
        let dispatcher = Arc::new(config.dispatcher());
        Self::with_dispatcher(config, dispatcher)
    }

    /// Registry delivering notifications through `dispatcher`.
    pub fn with_dispatcher(config: IncidentConfig, dispatcher: Arc<RetryingDispatcher>) -> Self {
        let store = config.log_store();
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                dispatcher,
                incidents: Mutex::new(Incidents::default()),
            }),
        }
    }

    pub fn config(&self) -> &IncidentConfig {
        &self.inner.config
    }

    /// Start the incident for `service`, or attach to the live one.
    pub async fn start(&self, service: &str) -> IncidentResult<IncidentHandle> {
        validate_service(service)?;

        let mut incidents = self.inner.incidents.lock().await;
        if let Some(live) = incidents.live.get(service) {
            if !live.handle.is_terminated() {
                info!(service, instance = %live.handle.instance_id(), "Attached to live incident");
                return Ok(live.handle.clone());
            }
            // Resolved but not yet torn down; retire it here.
            let final_state = live.handle.query();
            incidents.finished.insert(service.to_string(), final_state);
        }

        let prepared = self.prepare(service)?;
        let (incident, handle) = IncidentLoop::new(
            prepared.machine,
            prepared.log,
            self.inner.dispatcher.clone(),
            prepared.startup,
            prepared.pending,
        );

        let generation = incidents.next_generation;
        incidents.next_generation += 1;
        incidents.live.insert(
            service.to_string(),
            LiveIncident {
                generation,
                handle: handle.clone(),
            },
        );
        drop(incidents);

        let registry: Weak<Inner> = Arc::downgrade(&self.inner);
        let owner = service.to_string();
        tokio::spawn(async move {
            let final_state = incident.run().await;
            if let Some(registry) = registry.upgrade() {
                registry.teardown(&owner, generation, final_state).await;
            }
        });

        Ok(handle)
    }

    /// Open the service's log and decide between resume and fresh start.
    fn prepare(&self, service: &str) -> IncidentResult<Prepared> {
        let interval = self.inner.config.escalation_interval;
        let store = &self.inner.store;
        let mut pending = Vec::new();

        let mut log = store.open(service).map_err(|e| setup_error(service, e))?;
        if !log.is_empty() {
            let records = log.records().map_err(|e| setup_error(service, e))?;
            let replayed = EventHistory::new(records)
                .replay_for(service, interval)
                .map_err(|e| setup_error(service, e))?;

            if !replayed.machine.is_terminal() {
                info!(
                    service,
                    events = replayed.stats.total_events,
                    escalations = replayed.stats.escalations,
                    next_seq = replayed.next_seq,
                    "Resuming incident from event log"
                );
                return Ok(Prepared {
                    machine: replayed.machine,
                    log,
                    startup: Startup::Resumed,
                    pending: replayed.pending,
                });
            }

            // Nothing left to resume; the next incident starts a new log.
            // The resolution notice may not have gone out yet.
            pending = replayed.pending;
            drop(log);
            store.rotate(service).map_err(|e| setup_error(service, e))?;
            log = store.open(service).map_err(|e| setup_error(service, e))?;
        }

        let opened = log
            .append(LogEntry::Opened {
                service: service.to_string(),
            })
            .map_err(|e| setup_error(service, e))?;
        let machine = IncidentMachine::open(service, interval)
            .with_opened_at(opened.recorded_at.timestamp_millis());
        Ok(Prepared {
            machine,
            log,
            startup: Startup::Fresh,
            pending,
        })
    }

    /// Resume every unresolved incident found in the state directory.
    ///
    /// Resolved logs are left in place to be rotated by the next `start`.
    /// Logs that cannot be read are skipped with a warning so one damaged
    /// file does not keep the rest down. Returns the resumed services.
    pub async fn recover(&self) -> IncidentResult<Vec<ServiceId>> {
        let interval = self.inner.config.escalation_interval;
        let paths = self
            .inner
            .store
            .active_logs()
            .map_err(|e| setup_error("*", e))?;

        let mut resumed = Vec::new();
        for path in paths {
            let replayed = JsonlEventLog::open(&path)
                .and_then(|log| log.records())
                .map_err(|e| e.to_string())
                .and_then(|records| {
                    let history = EventHistory::new(records);
                    let service = history.service().map_err(|e| e.to_string())?.to_string();
                    let replayed = history.replay(interval).map_err(|e| e.to_string())?;
                    Ok((service, replayed))
                });

            let (service, replayed) = match replayed {
                Ok(found) => found,
                Err(error) => {
                    warn!(path = %path.display(), %error, "Skipping unreadable incident log");
                    continue;
                }
            };
            if replayed.machine.is_terminal() {
                continue;
            }
            if self.inner.store.path_for(&service).as_deref() != Some(path.as_path()) {
                warn!(service = %service, path = %path.display(), "Incident log name does not match its service");
                continue;
            }

            match self.start(&service).await {
                Ok(_) => resumed.push(service),
                Err(error) => {
                    warn!(service = %service, %error, "Failed to resume incident");
                }
            }
        }

        info!(count = resumed.len(), "Incident recovery complete");
        Ok(resumed)
    }

    /// Handle for a live incident.
    pub async fn handle(&self, service: &str) -> IncidentResult<IncidentHandle> {
        let incidents = self.inner.incidents.lock().await;
        match incidents.live.get(service) {
            Some(live) if !live.handle.is_terminated() => Ok(live.handle.clone()),
            Some(_) => Err(IncidentError::terminated(service)),
            None if incidents.finished.contains_key(service) => {
                Err(IncidentError::terminated(service))
            }
            None => Err(IncidentError::not_found(service)),
        }
    }

    /// Enqueue a command for a live incident.
    pub async fn send(&self, service: &str, command: Command) -> IncidentResult<()> {
        self.handle(service).await?.send(command).await
    }

    /// Apply a command and return the state right after it was committed.
    pub async fn execute(&self, service: &str, command: Command) -> IncidentResult<IncidentState> {
        self.handle(service).await?.execute(command).await
    }

    /// Current state of a live incident, or final state of a resolved one.
    pub async fn query(&self, service: &str) -> IncidentResult<IncidentState> {
        let incidents = self.inner.incidents.lock().await;
        if let Some(live) = incidents.live.get(service) {
            return Ok(live.handle.query());
        }
        incidents
            .finished
            .get(service)
            .cloned()
            .ok_or_else(|| IncidentError::not_found(service))
    }

    /// Services with a live incident.
    pub async fn live_services(&self) -> Vec<ServiceId> {
        let incidents = self.inner.incidents.lock().await;
        let mut services: Vec<_> = incidents.live.keys().cloned().collect();
        services.sort();
        services
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::incident::IncidentStatus;
    use crate::notify::{MemoryChannel, RetryPolicy};
    use std::time::Duration;

    fn registry() -> (IncidentRegistry, Arc<MemoryChannel>) {
        let channel = Arc::new(MemoryChannel::new());
        let dispatcher = Arc::new(RetryingDispatcher::new(
            channel.clone(),
            RetryPolicy::default(),
        ));
        (
            IncidentRegistry::with_dispatcher(IncidentConfig::default(), dispatcher),
            channel,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_start_attaches() {
        let (registry, _) = registry();
        let first = registry.start("db").await.unwrap();
        first.add_alert("a1").await.unwrap();
        let second = registry.start("db").await.unwrap();

        let state = second
            .execute(Command::AddAlert {
                alert_id: "a2".into(),
            })
            .await
            .unwrap();
        assert_eq!(state.alerts, vec!["a1", "a2"]);
        assert_eq!(registry.live_services().await, vec!["db"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_and_invalid_services() {
        let (registry, _) = registry();
        assert!(matches!(
            registry.query("nope").await,
            Err(IncidentError::NotFound { .. })
        ));
        assert!(matches!(
            registry
                .send(
                    "nope",
                    Command::Ack {
                        responder: "x".into()
                    }
                )
                .await,
            Err(IncidentError::NotFound { .. })
        ));
        assert!(matches!(
            registry.start("  ").await,
            Err(IncidentError::InvalidCommand { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_keeps_final_state() {
        let (registry, _) = registry();
        let handle = registry.start("db").await.unwrap();
        handle.resolve("bob").await.unwrap();
        let final_state = handle.wait_resolved().await;
        assert_eq!(final_state.status, IncidentStatus::Resolved);

        // Let the teardown task run.
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(registry.live_services().await.is_empty());

        let state = registry.query("db").await.unwrap();
        assert_eq!(state.resolved_by.as_deref(), Some("bob"));
        assert!(matches!(
            registry
                .send(
                    "db",
                    Command::AddAlert {
                        alert_id: "late".into()
                    }
                )
                .await,
            Err(IncidentError::Terminated { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_resolve_is_fresh() {
        let (registry, channel) = registry();
        let handle = registry.start("db").await.unwrap();
        handle
            .execute(Command::Resolve {
                responder: "bob".into(),
            })
            .await
            .unwrap();

        let again = registry.start("db").await.unwrap();
        let state = again.query();
        assert_eq!(state.status, IncidentStatus::Open);
        assert!(state.resolved_by.is_none());

        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(registry.live_services().await, vec!["db"]);
        assert!(channel
            .messages()
            .contains(&"Incident resolved by bob".to_string()));
    }
}
