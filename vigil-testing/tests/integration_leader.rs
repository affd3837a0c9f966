//! Leader lock behavior with several replicas sharing one registry.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_test::assert_ok;

use vigil_core::VigilError;
use vigil_leader::{LeaderLock, LeaseState, LockConfig};
use vigil_testing::{InMemoryRegistry, Operation};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

fn lock_config() -> LockConfig {
    LockConfig::default()
        .with_ttl(Duration::from_millis(600))
        .with_lock_delay(Duration::from_millis(50))
        .with_wait_time(Duration::from_millis(200))
        .with_renew_retry_interval(Duration::from_millis(20))
        .with_acquire_retry_interval(Duration::from_millis(20))
}

/// Only one of several racing replicas holds the lock at any time, and
/// every replica eventually gets its turn as the others release.
#[tokio::test]
async fn test_replicas_take_turns() {
    init_logging();
    let registry = Arc::new(InMemoryRegistry::new());
    let holders = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let concurrent = Arc::new(std::sync::atomic::AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for replica in 0..4 {
        let registry = Arc::clone(&registry);
        let holders = Arc::clone(&holders);
        let concurrent = Arc::clone(&concurrent);
        tasks.push(tokio::spawn(async move {
            let handle = LeaderLock::new(registry, lock_config()).acquire().await?;
            let before = concurrent.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            assert_eq!(before, 0, "two replicas held the lock at once");
            holders.lock().push(replica);

            tokio::time::sleep(Duration::from_millis(30)).await;

            concurrent.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
            handle.release().await?;
            Ok::<_, vigil_leader::LeaderError>(())
        }));
    }

    for task in tasks {
        timeout(Duration::from_secs(10), task)
            .await
            .expect("every replica should eventually lead")
            .unwrap()
            .unwrap();
    }

    let mut holders = holders.lock().clone();
    holders.sort();
    assert_eq!(holders, vec![0, 1, 2, 3]);
    assert!(registry.active_sessions().is_empty());
}

/// A leader that dies without releasing is replaced once its TTL runs out.
#[tokio::test]
async fn test_crashed_leader_is_replaced_after_ttl() {
    init_logging();
    let registry = Arc::new(InMemoryRegistry::new());

    let crashed = LeaderLock::new(Arc::clone(&registry), lock_config())
        .acquire()
        .await
        .unwrap();
    let crashed_session = crashed.session().to_string();
    // Dropping the handle stops renewal without releasing
    drop(crashed);

    let started = tokio::time::Instant::now();
    let successor = timeout(
        Duration::from_secs(5),
        LeaderLock::new(Arc::clone(&registry), lock_config()).acquire(),
    )
    .await
    .expect("successor should acquire after the TTL")
    .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_ne!(successor.session(), crashed_session);
    assert_eq!(
        registry.holder("vigil/.lock").as_deref(),
        Some(successor.session())
    );
    assert_ok!(successor.release().await);
}

/// A partition outlasting the TTL loses the lease.
#[tokio::test]
async fn test_partition_longer_than_ttl_loses_lease() {
    init_logging();
    let registry = Arc::new(InMemoryRegistry::new());
    let handle = LeaderLock::new(Arc::clone(&registry), lock_config())
        .acquire()
        .await
        .unwrap();
    let mut lease = handle.lease();

    registry.set_offline(true);
    let state = timeout(Duration::from_secs(3), lease.ended())
        .await
        .expect("lease should be lost once a TTL passes without renewal");
    assert!(matches!(state, LeaseState::Lost { .. }));
    registry.set_offline(false);

    handle.release().await.unwrap();
    assert_eq!(handle.lease().state(), state);
}

/// Release is performed once even when every clone of the handle races to
/// release it.
#[tokio::test]
async fn test_release_exactly_once() {
    init_logging();
    let registry = Arc::new(InMemoryRegistry::new());
    let handle = LeaderLock::new(Arc::clone(&registry), lock_config())
        .acquire()
        .await
        .unwrap();

    let releases: Vec<_> = (0..8)
        .map(|_| {
            let handle = handle.clone();
            tokio::spawn(async move { handle.release().await })
        })
        .collect();
    for release in releases {
        assert_ok!(release.await.unwrap());
    }

    assert_eq!(registry.call_count(Operation::KvRelease), 1);
    assert_eq!(registry.call_count(Operation::DestroySession), 1);
    assert_eq!(handle.lease().state(), LeaseState::Released);
}

/// An invalid session during acquisition is reported, not retried.
#[tokio::test]
async fn test_acquire_with_expired_session_fails() {
    init_logging();
    let registry = Arc::new(InMemoryRegistry::new());
    registry.inject_fault(Operation::KvAcquire, VigilError::session_expired("gone"));

    let err = LeaderLock::new(Arc::clone(&registry), lock_config())
        .acquire()
        .await
        .unwrap_err();
    assert!(matches!(
        VigilError::from(err),
        VigilError::SessionExpired { .. }
    ));
    assert!(registry.active_sessions().is_empty());
}
