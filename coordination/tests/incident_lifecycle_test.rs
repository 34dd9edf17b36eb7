//! Integration tests for the incident lifecycle
//!
//! Drives incidents through the registry with a paused clock and an
//! in-memory notification channel, checking state transitions, escalation
//! timing and the notifications emitted along the way.

use std::sync::Arc;
use std::time::Duration;

use incident_coordination::{
    Command, IncidentConfig, IncidentError, IncidentRegistry, IncidentStatus, MemoryChannel,
    RetryPolicy, RetryingDispatcher,
};

/// Route library logs to the test harness; `RUST_LOG` picks the level
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Registry with default config and a recording channel
fn registry_with(policy: RetryPolicy) -> (IncidentRegistry, Arc<MemoryChannel>) {
    init_tracing();
    let channel = Arc::new(MemoryChannel::new());
    let dispatcher = Arc::new(RetryingDispatcher::new(channel.clone(), policy));
    let registry = IncidentRegistry::with_dispatcher(IncidentConfig::default(), dispatcher);
    (registry, channel)
}

fn registry() -> (IncidentRegistry, Arc<MemoryChannel>) {
    registry_with(RetryPolicy::default())
}

fn add_alert(id: &str) -> Command {
    Command::AddAlert {
        alert_id: id.to_string(),
    }
}

fn ack(responder: &str) -> Command {
    Command::Ack {
        responder: responder.to_string(),
    }
}

fn resolve(responder: &str) -> Command {
    Command::Resolve {
        responder: responder.to_string(),
    }
}

/// Let spawned tasks drain without moving past any pending timer.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// Test: alert, ack and resolve walk the incident through every status
#[tokio::test(start_paused = true)]
async fn test_ack_then_resolve_lifecycle() {
    let (registry, channel) = registry();
    let incident = registry.start("payments").await.unwrap();

    let state = incident.query();
    assert_eq!(state.status, IncidentStatus::Open);
    assert!(state.alerts.is_empty());
    assert_eq!(state.escalation_level, 0);
    assert_eq!(incident.instance_id(), "incident-payments");

    let state = incident.execute(add_alert("a1")).await.unwrap();
    assert_eq!(state.alerts, vec!["a1"]);

    let state = incident.execute(ack("alice")).await.unwrap();
    assert_eq!(state.status, IncidentStatus::Acked);
    assert_eq!(state.acked_by.as_deref(), Some("alice"));

    let state = incident.execute(resolve("alice")).await.unwrap();
    assert_eq!(state.status, IncidentStatus::Resolved);
    assert_eq!(state.resolved_by.as_deref(), Some("alice"));

    settle().await;
    assert_eq!(
        channel.messages(),
        vec![
            "Incident opened for service: payments",
            "New alert added to incident: a1",
            "Incident acknowledged by alice",
            "Incident resolved by alice",
        ]
    );
    assert!(registry.live_services().await.is_empty());
}

/// Test: each full interval without an ack raises the level by one
#[tokio::test(start_paused = true)]
async fn test_escalates_until_resolved() {
    let (registry, channel) = registry();
    let incident = registry.start("db").await.unwrap();

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(incident.query().escalation_level, 1);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(incident.query().escalation_level, 2);

    let state = incident.execute(resolve("bob")).await.unwrap();
    assert_eq!(state.status, IncidentStatus::Resolved);
    assert_eq!(state.escalation_level, 2);

    tokio::time::sleep(Duration::from_secs(120)).await;
    let state = registry.query("db").await.unwrap();
    assert_eq!(state.escalation_level, 2);

    let escalations: Vec<_> = channel
        .messages()
        .into_iter()
        .filter(|m| m.starts_with("ESCALATION"))
        .collect();
    assert_eq!(
        escalations,
        vec![
            "ESCALATION: Incident not acknowledged after 30s, escalating to level 1",
            "ESCALATION: Incident not acknowledged after 30s, escalating to level 2",
        ]
    );
}

/// Test: the first ack wins and stops escalation
#[tokio::test(start_paused = true)]
async fn test_first_ack_wins() {
    let (registry, channel) = registry();
    let incident = registry.start("search").await.unwrap();

    incident.execute(ack("carol")).await.unwrap();
    let state = incident.execute(ack("dave")).await.unwrap();
    assert_eq!(state.status, IncidentStatus::Acked);
    assert_eq!(state.acked_by.as_deref(), Some("carol"));

    // The timer armed before the ack still fires, but is discarded.
    tokio::time::sleep(Duration::from_secs(90)).await;
    assert_eq!(incident.query().escalation_level, 0);

    let acks = channel
        .messages()
        .into_iter()
        .filter(|m| m.starts_with("Incident acknowledged"))
        .count();
    assert_eq!(acks, 1);
}

/// Test: commands already queued together are taken alert, ack, resolve
#[tokio::test(start_paused = true)]
async fn test_ready_commands_follow_channel_priority() {
    let (registry, _) = registry();
    let incident = registry.start("cache").await.unwrap();

    // Queued before the loop gets to run.
    incident.send(resolve("bob")).await.unwrap();
    incident.send(ack("alice")).await.unwrap();
    incident.send(add_alert("a1")).await.unwrap();

    let state = incident.wait_resolved().await;
    assert_eq!(state.alerts, vec!["a1"]);
    assert_eq!(state.acked_by.as_deref(), Some("alice"));
    assert_eq!(state.resolved_by.as_deref(), Some("bob"));
}

/// Test: commands after resolution are refused
#[tokio::test(start_paused = true)]
async fn test_commands_after_resolve_rejected() {
    let (registry, _) = registry();
    let incident = registry.start("db").await.unwrap();
    incident.execute(resolve("bob")).await.unwrap();

    let err = incident.add_alert("late").await.unwrap_err();
    assert!(matches!(err, IncidentError::Terminated { .. }));
    assert_eq!(err.code(), "TERMINATED");

    settle().await;
    let err = registry.send("db", ack("carol")).await.unwrap_err();
    assert!(matches!(err, IncidentError::Terminated { .. }));

    let state = registry.query("db").await.unwrap();
    assert!(state.alerts.is_empty());
    assert!(state.acked_by.is_none());
}

/// Test: malformed commands never reach the loop
#[tokio::test(start_paused = true)]
async fn test_invalid_commands_rejected_at_boundary() {
    let (registry, _) = registry();
    let incident = registry.start("db").await.unwrap();

    let err = incident.ack("").await.unwrap_err();
    assert!(matches!(err, IncidentError::InvalidCommand { .. }));
    let err = incident.add_alert("   ").await.unwrap_err();
    assert_eq!(err.code(), "INVALID_COMMAND");

    settle().await;
    let state = incident.query();
    assert_eq!(state.status, IncidentStatus::Open);
    assert!(state.alerts.is_empty());
}

/// Test: failed deliveries are retried, then dropped without touching state
#[tokio::test(start_paused = true)]
async fn test_notification_failures_do_not_block_transitions() {
    let policy = RetryPolicy {
        maximum_attempts: 3,
        ..RetryPolicy::default()
    };
    let (registry, channel) = registry_with(policy);
    channel.fail_next(100);

    let incident = registry.start("db").await.unwrap();
    let state = incident.execute(add_alert("a1")).await.unwrap();
    assert_eq!(state.alerts, vec!["a1"]);

    let state = incident.execute(resolve("bob")).await.unwrap();
    assert_eq!(state.status, IncidentStatus::Resolved);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(channel.delivered().is_empty());
    // opened, alert, resolve: three attempts each
    assert_eq!(channel.attempts(), 9);
}

/// Test: separate services run independent incidents
#[tokio::test(start_paused = true)]
async fn test_services_are_independent() {
    let (registry, _) = registry();
    let db = registry.start("db").await.unwrap();
    let web = registry.start("web").await.unwrap();

    db.execute(ack("carol")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(31)).await;

    assert_eq!(db.query().escalation_level, 0);
    assert_eq!(web.query().escalation_level, 1);
    assert_eq!(registry.live_services().await, vec!["db", "web"]);
}
