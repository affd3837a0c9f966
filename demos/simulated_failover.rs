//! # Simulated Failover
//!
//! Two replicas race for leadership over an in-memory registry. The leader
//! reports a few health transitions, then its session expires; the standby
//! takes over and, thanks to the shared snapshot, reports only what changed
//! after the handover.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn, Level};
use vigil_core::{format_event, HealthRecord, Status};
use vigil_leader::LockConfig;
use vigil_persistence::RegistryStateStore;
use vigil_testing::InMemoryRegistry;
use vigil_watch::{EventReceiver, Monitor, MonitorConfig, WatchConfig};

fn config() -> MonitorConfig {
    MonitorConfig::default()
        .with_lock(
            LockConfig::default()
                .with_ttl(Duration::from_secs(2))
                .with_lock_delay(Duration::from_millis(200))
                .with_wait_time(Duration::from_millis(500)),
        )
        .with_watch(WatchConfig::default().with_wait_time(Duration::from_millis(500)))
}

async fn drain(name: &str, events: &mut EventReceiver) {
    loop {
        match events.recv().await {
            Ok(Some(event)) => {
                let (severity, message) = format_event(&event);
                info!("{} [{}] {}", name, severity, message);
            }
            Ok(None) => break,
            Err(e) => {
                warn!("{} feed ended: {}", name, e);
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let registry = Arc::new(InMemoryRegistry::new());
    registry.set_check(
        HealthRecord::new("node-1", "web-1", "http", Status::Passing).with_service_name("web"),
    );
    registry.set_check(
        HealthRecord::new("node-2", "db-1", "tcp", Status::Passing).with_service_name("db"),
    );

    let spawn_replica = |name: &'static str| {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            let store = RegistryStateStore::new(Arc::clone(&registry));
            let (monitor, mut events) = Monitor::start(registry, store, config()).await?;
            info!("{} is leader (session {})", name, monitor.session());
            drain(name, &mut events).await;
            let _ = monitor.shutdown().await;
            Ok::<_, vigil_core::VigilError>(monitor.session().to_string())
        })
    };

    let first = spawn_replica("replica-a");
    tokio::time::sleep(Duration::from_millis(300)).await;
    let second = spawn_replica("replica-b");

    tokio::time::sleep(Duration::from_millis(300)).await;
    registry.set_check(
        HealthRecord::new("node-1", "web-1", "http", Status::Critical).with_service_name("web"),
    );
    tokio::time::sleep(Duration::from_millis(300)).await;

    info!("Expiring the leader's session");
    for session in registry.active_sessions() {
        if registry.holder("vigil/.lock").as_deref() == Some(session.as_str()) {
            registry.expire_session(&session);
        }
    }
    let ended = first.await??;
    info!("Former leader {} stepped down", ended);

    tokio::time::sleep(Duration::from_millis(800)).await;
    registry.set_check(
        HealthRecord::new("node-1", "web-1", "http", Status::Passing).with_service_name("web"),
    );
    registry.set_check(
        HealthRecord::new("node-2", "db-1", "_service_maintenance:db-1", Status::Critical)
            .with_service_name("db"),
    );
    tokio::time::sleep(Duration::from_millis(800)).await;

    registry.set_offline(true);
    let ended = second.await??;
    info!("Replica {} stopped after losing the registry", ended);
    Ok(())
}
