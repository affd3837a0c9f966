//! End-to-end behavior of an elected watch loop over the simulated registry.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use vigil_core::{ChangeEvent, HealthRecord, RemovalPolicy, ServiceKey, Status, VigilError};
use vigil_leader::LockConfig;
use vigil_persistence::{InMemoryStateStore, RegistryStateStore};
use vigil_testing::{InMemoryRegistry, Operation};
use vigil_watch::{EventReceiver, Monitor, MonitorConfig, WatchConfig};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

fn monitor_config() -> MonitorConfig {
    MonitorConfig::default()
        .with_lock(
            LockConfig::default()
                .with_ttl(Duration::from_millis(600))
                .with_lock_delay(Duration::ZERO)
                .with_wait_time(Duration::from_millis(100)),
        )
        .with_watch(
            WatchConfig::default()
                .with_wait_time(Duration::from_millis(100))
                .with_channel_capacity(16),
        )
}

async fn next_event(events: &mut EventReceiver) -> ChangeEvent {
    timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("feed failed")
        .expect("feed closed")
}

/// Collects whatever arrives within `window`.
async fn drain_for(events: &mut EventReceiver, window: Duration) -> Vec<ChangeEvent> {
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + window;
    while let Ok(Ok(Some(event))) = tokio::time::timeout_at(deadline, events.recv()).await {
        seen.push(event);
    }
    seen
}

fn web(status: Status) -> HealthRecord {
    HealthRecord::new("node-1", "web-1", "http", status).with_service_name("web")
}

/// The worst check of a service decides its status, and recovering one of
/// two failing checks does not report recovery.
#[tokio::test]
async fn test_worst_check_wins() {
    init_logging();
    let registry = Arc::new(InMemoryRegistry::new());
    registry.set_check(web(Status::Passing));
    registry.set_check(HealthRecord::new("node-1", "web-1", "tcp", Status::Passing));

    let (monitor, mut events) =
        Monitor::start(Arc::clone(&registry), InMemoryStateStore::new(), monitor_config())
            .await
            .unwrap();
    assert_eq!(next_event(&mut events).await.new_status(), Some(Status::Passing));

    registry.set_check(web(Status::Critical));
    assert_eq!(next_event(&mut events).await.new_status(), Some(Status::Critical));

    registry.set_check(HealthRecord::new("node-1", "web-1", "tcp", Status::Warning));
    assert!(drain_for(&mut events, Duration::from_millis(300)).await.is_empty());

    registry.set_check(web(Status::Passing));
    assert_eq!(next_event(&mut events).await.new_status(), Some(Status::Warning));

    monitor.shutdown().await.unwrap();
}

/// A maintenance marker overrides every other check of the service.
#[tokio::test]
async fn test_maintenance_marker_overrides() {
    init_logging();
    let registry = Arc::new(InMemoryRegistry::new());
    registry.set_check(web(Status::Critical));

    let (monitor, mut events) =
        Monitor::start(Arc::clone(&registry), InMemoryStateStore::new(), monitor_config())
            .await
            .unwrap();
    assert_eq!(next_event(&mut events).await.new_status(), Some(Status::Critical));

    // Consul reports maintenance markers as critical checks
    registry.set_check(HealthRecord::new(
        "node-1",
        "web-1",
        "_service_maintenance:web-1",
        Status::Critical,
    ));
    match next_event(&mut events).await {
        ChangeEvent::StatusChanged(change) => {
            assert_eq!(change.old_status, Some(Status::Critical));
            assert_eq!(change.new_status, Status::Maintenance);
            assert_eq!(change.record.check_id, "_service_maintenance:web-1");
        }
        other => panic!("unexpected event {:?}", other),
    }

    monitor.shutdown().await.unwrap();
}

/// Node-level checks never produce events, whatever their status.
#[tokio::test]
async fn test_node_checks_are_ignored() {
    init_logging();
    let registry = Arc::new(InMemoryRegistry::new());
    registry.set_check(HealthRecord::new("node-1", "", "serfHealth", Status::Passing));

    let (monitor, mut events) =
        Monitor::start(Arc::clone(&registry), InMemoryStateStore::new(), monitor_config())
            .await
            .unwrap();

    registry.set_check(HealthRecord::new("node-1", "", "serfHealth", Status::Critical));
    assert!(drain_for(&mut events, Duration::from_millis(300)).await.is_empty());

    monitor.shutdown().await.unwrap();
}

/// Services whose ids contain the characters a joined key would use as a
/// delimiter are kept apart.
#[tokio::test]
async fn test_delimiter_characters_in_ids() {
    init_logging();
    let registry = Arc::new(InMemoryRegistry::new());
    registry.set_check(HealthRecord::new("a:b", "c", "check", Status::Passing));
    registry.set_check(HealthRecord::new("a", "b:c", "check", Status::Critical));

    let store = RegistryStateStore::new(Arc::clone(&registry));
    let (monitor, mut events) = Monitor::start(Arc::clone(&registry), store, monitor_config())
        .await
        .unwrap();

    let mut keys = vec![
        next_event(&mut events).await.key().clone(),
        next_event(&mut events).await.key().clone(),
    ];
    keys.sort();
    assert_eq!(
        keys,
        vec![ServiceKey::new("a", "b:c"), ServiceKey::new("a:b", "c")]
    );
    monitor.shutdown().await.unwrap();

    let saved = vigil_core::AggregatedState::from_bytes(
        &registry.value("vigil/state").expect("state saved"),
    )
    .unwrap();
    assert_eq!(saved.get(&ServiceKey::new("a", "b:c")), Some(Status::Critical));
    assert_eq!(saved.get(&ServiceKey::new("a:b", "c")), Some(Status::Passing));
}

/// Deregistrations are only reported when asked for; either way a service
/// that comes back is reported as new.
#[tokio::test]
async fn test_removal_policies() {
    init_logging();
    for policy in [RemovalPolicy::Ignore, RemovalPolicy::Report] {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.set_check(web(Status::Passing));

        let config = monitor_config().with_watch(
            WatchConfig::default()
                .with_wait_time(Duration::from_millis(100))
                .with_removals(policy),
        );
        let (monitor, mut events) =
            Monitor::start(Arc::clone(&registry), InMemoryStateStore::new(), config)
                .await
                .unwrap();
        next_event(&mut events).await;

        registry.deregister_service("node-1", "web-1");
        let removed = drain_for(&mut events, Duration::from_millis(300)).await;
        match policy {
            RemovalPolicy::Ignore => assert!(removed.is_empty()),
            RemovalPolicy::Report => assert_eq!(
                removed,
                vec![ChangeEvent::Deregistered {
                    key: ServiceKey::new("node-1", "web-1"),
                    last_status: Status::Passing,
                }]
            ),
        }

        registry.set_check(web(Status::Passing));
        match next_event(&mut events).await {
            ChangeEvent::StatusChanged(change) => assert_eq!(change.old_status, None),
            other => panic!("unexpected event {:?}", other),
        }

        monitor.shutdown().await.unwrap();
    }
}

/// A registry failure ends the feed with that error, reported once.
#[tokio::test]
async fn test_fatal_poll_error_surfaces_once() {
    init_logging();
    let registry = Arc::new(InMemoryRegistry::new());
    registry.set_check(web(Status::Passing));

    let (monitor, mut events) =
        Monitor::start(Arc::clone(&registry), InMemoryStateStore::new(), monitor_config())
            .await
            .unwrap();
    next_event(&mut events).await;

    // Fails the poll after the one in flight
    registry.inject_fault(Operation::HealthState, VigilError::connectivity("partition"));

    let failure = timeout(Duration::from_secs(2), events.recv()).await.unwrap();
    assert!(matches!(failure, Err(VigilError::Connectivity { .. })));
    assert_eq!(events.recv().await.unwrap(), None);

    // The loop released leadership on its way out
    assert!(monitor.wait().await.is_err());
    assert_eq!(registry.holder("vigil/.lock"), None);
}

/// Shutdown completes within one wait time plus release, even with an idle
/// registry.
#[tokio::test]
async fn test_shutdown_is_bounded() {
    init_logging();
    let registry = Arc::new(InMemoryRegistry::new());
    let (monitor, _events) =
        Monitor::start(Arc::clone(&registry), InMemoryStateStore::new(), monitor_config())
            .await
            .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;

    let started = tokio::time::Instant::now();
    monitor.shutdown().await.unwrap();
    assert!(started.elapsed() < Duration::from_millis(500));
    assert!(registry.active_sessions().is_empty());
}
