//! Session renewal and the lease signal derived from it.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, warn};
use vigil_core::{Registry, SessionId};

/// Whether the session behind a lock can still be trusted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseState {
    Held,
    /// Renewal failed irrecoverably; leadership must be considered gone.
    Lost { reason: String },
    /// Released on shutdown.
    Released,
}

/// Read side of a lock's lease, handed to whoever must stop acting as
/// leader when the session is lost.
#[derive(Debug, Clone)]
pub struct Lease {
    session: SessionId,
    state: watch::Receiver<LeaseState>,
}

impl Lease {
    pub(crate) fn new(session: SessionId, state: watch::Receiver<LeaseState>) -> Self {
        Self { session, state }
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn state(&self) -> LeaseState {
        self.state.borrow().clone()
    }

    pub fn is_held(&self) -> bool {
        matches!(*self.state.borrow(), LeaseState::Held)
    }

    /// Resolves once the lease is no longer held, with the final state.
    pub async fn ended(&mut self) -> LeaseState {
        match self
            .state
            .wait_for(|state| !matches!(state, LeaseState::Held))
            .await
        {
            Ok(state) => state.clone(),
            // The handle is gone without a release
            Err(_) => LeaseState::Lost {
                reason: "lock handle dropped".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RenewalSchedule {
    pub ttl: Duration,
    pub interval: Duration,
    pub retry_interval: Duration,
}

/// Keeps `session` alive until `stop` flips to true.
///
/// A `SessionExpired` answer ends leadership immediately. Retryable errors
/// are retried until a whole TTL has gone by without a successful renewal,
/// since by then the registry has invalidated the session anyway.
pub(crate) fn spawn_renewal(
    registry: Arc<dyn Registry>,
    session: SessionId,
    schedule: RenewalSchedule,
    lease: Arc<watch::Sender<LeaseState>>,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_renewed = Instant::now();
        let mut next = schedule.interval;

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                _ = sleep(next) => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
            }

            match registry.renew_session(&session).await {
                Ok(()) => {
                    debug!("Session {} renewed", session);
                    last_renewed = Instant::now();
                    next = schedule.interval;
                }
                Err(e) if e.is_retryable() && last_renewed.elapsed() < schedule.ttl => {
                    let remaining = schedule.ttl.saturating_sub(last_renewed.elapsed());
                    let jitter_ms = schedule.retry_interval.as_millis() as u64 / 4;
                    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms));
                    next = (schedule.retry_interval + jitter).min(remaining);
                    warn!(
                        "Session {} renewal failed, retrying in {:?}: {}",
                        session, next, e
                    );
                }
                Err(e) => {
                    error!("Session {} renewal failed, leadership lost: {}", session, e);
                    lease.send_if_modified(|state| {
                        if *state == LeaseState::Held {
                            *state = LeaseState::Lost {
                                reason: e.to_string(),
                            };
                            true
                        } else {
                            false
                        }
                    });
                    break;
                }
            }
        }

        debug!("Renewal task for session {} stopped", session);
    })
}
