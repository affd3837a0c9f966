//! Advisory leader lock on a registry key.

use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use vigil_core::{
    validate_key, QueryOptions, Registry, SessionBehavior, SessionId, SessionSpec, VigilError,
    WaitIndex,
};

use crate::session::{spawn_renewal, Lease, LeaseState, RenewalSchedule};
use crate::{LeaderError, LeaderResult};

/// Configuration for the leader lock
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// Registry key used as the advisory lock
    pub key: String,

    /// Name attached to the session, for operators
    pub session_name: String,

    /// Session time-to-live
    pub ttl: Duration,

    /// Window after session invalidation during which the key cannot be
    /// re-acquired, so a flapping holder does not bounce leadership
    pub lock_delay: Duration,

    /// Wait time of blocking reads on the lock key
    pub wait_time: Duration,

    /// Interval between session renewals, must be below the TTL
    pub renew_interval: Duration,

    /// Delay between renewal attempts after a transient failure
    pub renew_retry_interval: Duration,

    /// Delay before retrying an acquire refused on an unheld key
    pub acquire_retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            key: "vigil/.lock".to_string(),
            session_name: "vigil".to_string(),
            ttl: Duration::from_secs(30),
            lock_delay: Duration::from_secs(1),
            wait_time: Duration::from_secs(15),
            renew_interval: Duration::from_secs(15),
            renew_retry_interval: Duration::from_secs(1),
            acquire_retry_interval: Duration::from_secs(1),
        }
    }
}

impl LockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_session_name(mut self, name: impl Into<String>) -> Self {
        self.session_name = name.into();
        self
    }

    /// Sets the TTL and renews at half of it.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self.renew_interval = ttl / 2;
        self
    }

    pub fn with_lock_delay(mut self, delay: Duration) -> Self {
        self.lock_delay = delay;
        self
    }

    pub fn with_wait_time(mut self, wait: Duration) -> Self {
        self.wait_time = wait;
        self
    }

    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    pub fn with_renew_retry_interval(mut self, interval: Duration) -> Self {
        self.renew_retry_interval = interval;
        self
    }

    pub fn with_acquire_retry_interval(mut self, interval: Duration) -> Self {
        self.acquire_retry_interval = interval;
        self
    }

    pub fn validate(&self) -> LeaderResult<()> {
        validate_key(&self.key).map_err(|e| LeaderError::ConfigError {
            reason: e.to_string(),
        })?;
        if self.ttl.is_zero() || self.wait_time.is_zero() {
            return Err(LeaderError::ConfigError {
                reason: "ttl and wait time must be positive".to_string(),
            });
        }
        if self.renew_interval.is_zero() || self.renew_interval >= self.ttl {
            return Err(LeaderError::ConfigError {
                reason: format!(
                    "renew interval {:?} must be positive and below ttl {:?}",
                    self.renew_interval, self.ttl
                ),
            });
        }
        Ok(())
    }

    fn session_spec(&self) -> SessionSpec {
        SessionSpec {
            name: self.session_name.clone(),
            ttl: self.ttl,
            lock_delay: self.lock_delay,
            behavior: SessionBehavior::Delete,
        }
    }

    fn renewal_schedule(&self) -> RenewalSchedule {
        RenewalSchedule {
            ttl: self.ttl,
            interval: self.renew_interval,
            retry_interval: self.renew_retry_interval,
        }
    }
}

/// Acquires exclusive leadership among replicas sharing a registry.
pub struct LeaderLock<R: Registry + 'static> {
    registry: Arc<R>,
    config: LockConfig,
}

impl<R: Registry + 'static> LeaderLock<R> {
    pub fn new(registry: Arc<R>, config: LockConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Blocks until this process holds the lock.
    ///
    /// Creates a session, starts renewing it, then alternates blocking reads
    /// of the lock key with atomic acquire attempts. Registry errors are not
    /// retried: the session is torn down and the error returned.
    pub async fn acquire(&self) -> LeaderResult<LockHandle> {
        let (_cancel_tx, cancel) = watch::channel(false);
        self.acquire_until(cancel).await
    }

    /// Like [`acquire`](Self::acquire), but gives up with
    /// [`LeaderError::Cancelled`] once `cancel` is set or its sender is
    /// dropped. The waiting session is destroyed before returning, so it
    /// does not linger until its TTL runs out.
    pub async fn acquire_until(
        &self,
        mut cancel: watch::Receiver<bool>,
    ) -> LeaderResult<LockHandle> {
        self.config.validate()?;
        if *cancel.borrow() {
            return Err(LeaderError::Cancelled);
        }

        let registry: Arc<dyn Registry> = self.registry.clone();
        let session = registry
            .create_session(&self.config.session_spec())
            .await
            .map_err(|source| LeaderError::SessionCreation { source })?;
        info!("Session {} created", session);

        let (stop_tx, stop_rx) = watch::channel(false);
        let (lease_tx, _) = watch::channel(LeaseState::Held);
        let lease_tx = Arc::new(lease_tx);
        let renewal = spawn_renewal(
            Arc::clone(&registry),
            session.clone(),
            self.config.renewal_schedule(),
            Arc::clone(&lease_tx),
            stop_rx,
        );

        info!("Waiting for lock {}", self.config.key);
        let waited = tokio::select! {
            waited = self.wait_for_lock(&session, &lease_tx) => waited,
            _ = cancel.wait_for(|cancelled| *cancelled) => {
                info!("Stopped waiting for lock {}", self.config.key);
                Err(LeaderError::Cancelled)
            }
        };
        match waited {
            Ok(()) => {
                info!("Lock {} acquired by session {}", self.config.key, session);
                Ok(LockHandle {
                    inner: Arc::new(HandleInner {
                        registry,
                        key: self.config.key.clone(),
                        session,
                        state: Mutex::new(HandleState {
                            locked: true,
                            released: false,
                        }),
                        stop_tx,
                        lease_tx,
                        renewal: SyncMutex::new(Some(renewal)),
                    }),
                })
            }
            Err(e) => {
                stop_tx.send_replace(true);
                renewal.abort();
                if let Err(destroy_err) = registry.destroy_session(&session).await {
                    warn!(
                        "Failed to destroy session {} after failed acquisition: {}",
                        session, destroy_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn wait_for_lock(
        &self,
        session: &str,
        lease: &watch::Sender<LeaseState>,
    ) -> LeaderResult<()> {
        let key = self.config.key.as_str();
        let acquisition = |source: VigilError| LeaderError::Acquisition {
            key: key.to_string(),
            source,
        };
        let mut wait_index = WaitIndex::ZERO;

        loop {
            let current = lease.borrow().clone();
            if let LeaseState::Lost { reason } = current {
                return Err(LeaderError::LeaseLost {
                    session: session.to_string(),
                    reason,
                });
            }

            let options = QueryOptions::blocking(wait_index, self.config.wait_time);
            let (entry, meta) = self
                .registry
                .kv_get(key, &options)
                .await
                .map_err(acquisition)?;
            wait_index = wait_index.advance(meta.last_index);

            let holder = entry.and_then(|entry| entry.session);
            if let Some(holder) = holder.as_deref() {
                if holder != session {
                    debug!("Lock {} held by session {}", key, holder);
                    continue;
                }
            }

            if self
                .registry
                .kv_acquire(key, session.as_bytes(), session)
                .await
                .map_err(acquisition)?
            {
                return Ok(());
            }

            // Unheld but refused: the previous holder's lock-delay is running
            debug!(
                "Lock {} refused, retrying in {:?}",
                key, self.config.acquire_retry_interval
            );
            sleep(self.config.acquire_retry_interval).await;
            wait_index = WaitIndex::ZERO;
        }
    }
}

struct HandleState {
    locked: bool,
    released: bool,
}

struct HandleInner {
    registry: Arc<dyn Registry>,
    key: String,
    session: SessionId,
    state: Mutex<HandleState>,
    stop_tx: watch::Sender<bool>,
    lease_tx: Arc<watch::Sender<LeaseState>>,
    renewal: SyncMutex<Option<JoinHandle<()>>>,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        let released = self
            .state
            .try_lock()
            .map(|state| state.released)
            .unwrap_or(false);
        if !released {
            warn!(
                "Lock {} dropped without release; session {} will expire by TTL",
                self.key, self.session
            );
        }
        self.stop_tx.send_replace(true);
        if let Some(task) = self.renewal.get_mut().take() {
            task.abort();
        }
    }
}

/// Proof of leadership. Cheap to clone; all clones share one release.
#[derive(Clone)]
pub struct LockHandle {
    inner: Arc<HandleInner>,
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("key", &self.inner.key)
            .field("session", &self.inner.session)
            .finish()
    }
}

impl LockHandle {
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    pub fn session(&self) -> &str {
        &self.inner.session
    }

    /// A receiver that observes session loss.
    pub fn lease(&self) -> Lease {
        Lease::new(self.inner.session.clone(), self.inner.lease_tx.subscribe())
    }

    pub fn is_held(&self) -> bool {
        matches!(*self.inner.lease_tx.borrow(), LeaseState::Held)
    }

    /// Releases the key, then destroys the session.
    ///
    /// Runs once no matter how many clones call it or how concurrently;
    /// later calls return `Ok(())`. A failed key release is only logged since
    /// the session's TTL reclaims the key; a failed destroy is returned.
    pub async fn release(&self) -> LeaderResult<()> {
        let inner = &self.inner;
        let mut state = inner.state.lock().await;
        if state.released {
            debug!("Lock {} already released", inner.key);
            return Ok(());
        }
        state.released = true;

        inner.stop_tx.send_replace(true);
        let renewal = inner.renewal.lock().take();
        if let Some(task) = renewal {
            let _ = task.await;
        }

        if state.locked {
            info!("Releasing lock {}", inner.key);
            match inner.registry.kv_release(&inner.key, &inner.session).await {
                Ok(true) => {}
                Ok(false) => warn!("Lock {} was no longer held by {}", inner.key, inner.session),
                Err(e) => warn!("Failed to release lock {}: {}", inner.key, e),
            }
            state.locked = false;
        }

        inner.lease_tx.send_if_modified(|lease| {
            if *lease == LeaseState::Held {
                *lease = LeaseState::Released;
                true
            } else {
                false
            }
        });

        info!("Destroying session {}", inner.session);
        inner
            .registry
            .destroy_session(&inner.session)
            .await
            .map_err(|e| LeaderError::Release {
                reason: format!("destroy session {}: {}", inner.session, e),
            })
    }
}
