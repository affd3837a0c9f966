//! Lifecycle of a leader: elect, watch, release.

use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use vigil_core::{Registry, Result, StateStore, VigilError};
use vigil_leader::{LeaderLock, LockHandle};

use crate::{event_channel, EventReceiver, MonitorConfig, Watcher};

struct Shutdown {
    listener: Option<JoinHandle<Result<()>>>,
    outcome: Option<Result<()>>,
}

/// A running, elected watch loop.
///
/// Dropping the monitor without [`shutdown`](Monitor::shutdown) still stops
/// the loop at its next cycle and releases the lock from the background.
pub struct Monitor {
    stop_tx: watch::Sender<bool>,
    lock: LockHandle,
    shutdown: Mutex<Shutdown>,
}

impl Monitor {
    /// Blocks until elected, then starts watching.
    ///
    /// Returns once this process holds the lock; the receiver yields every
    /// status transition from then on. Fails if the lock cannot be acquired.
    pub async fn start<R, S>(
        registry: Arc<R>,
        store: S,
        config: MonitorConfig,
    ) -> Result<(Monitor, EventReceiver)>
    where
        R: Registry + 'static,
        S: StateStore + 'static,
    {
        let (_cancel_tx, cancel) = watch::channel(false);
        Self::start_until(registry, store, config, cancel).await
    }

    /// Like [`start`](Monitor::start), but stops waiting for the lock once
    /// `cancel` is set, failing with [`VigilError::ChannelClosed`] after the
    /// waiting session has been destroyed.
    pub async fn start_until<R, S>(
        registry: Arc<R>,
        store: S,
        config: MonitorConfig,
        cancel: watch::Receiver<bool>,
    ) -> Result<(Monitor, EventReceiver)>
    where
        R: Registry + 'static,
        S: StateStore + 'static,
    {
        config.watch.validate()?;

        let lock = LeaderLock::new(Arc::clone(&registry), config.lock)
            .acquire_until(cancel)
            .await?;
        info!("Elected leader with session {}", lock.session());

        let (events, receiver) = event_channel(config.watch.channel_capacity);
        let (stop_tx, stop_rx) = watch::channel(false);

        let watcher = Watcher::new(registry, store, config.watch, events, stop_rx)
            .with_lease(lock.lease());
        let watch_task = tokio::spawn(watcher.run());

        // Releases leadership once the loop has ended, however it ended
        let handle = lock.clone();
        let listener = tokio::spawn(async move {
            let outcome = match watch_task.await {
                Ok(outcome) => outcome,
                Err(e) => Err(VigilError::internal(format!("watch loop aborted: {}", e))),
            };
            if let Err(e) = handle.release().await {
                warn!("Failed to release leadership: {}", e);
            }
            outcome
        });

        Ok((
            Monitor {
                stop_tx,
                lock,
                shutdown: Mutex::new(Shutdown {
                    listener: Some(listener),
                    outcome: None,
                }),
            },
            receiver,
        ))
    }

    /// Asks the loop to stop at its next cycle. Idempotent and non-blocking.
    pub fn close(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.stop_tx.borrow()
    }

    pub fn session(&self) -> &str {
        self.lock.session()
    }

    /// Whether the lock is still held: false after release or lease loss.
    pub fn is_leader(&self) -> bool {
        self.lock.is_held()
    }

    /// Stops the loop and waits for it to end and the lock to be released.
    ///
    /// Returns the loop's outcome; every call sees the same one.
    pub async fn shutdown(&self) -> Result<()> {
        self.close();
        self.wait().await
    }

    /// Waits for the loop to end on its own (fatal error, lost lease, dropped
    /// receiver) and the lock to be released, without requesting a stop.
    pub async fn wait(&self) -> Result<()> {
        let mut shutdown = self.shutdown.lock().await;
        if let Some(outcome) = &shutdown.outcome {
            return outcome.clone();
        }

        let outcome = match shutdown.listener.take() {
            Some(listener) => match listener.await {
                Ok(outcome) => outcome,
                Err(e) => Err(VigilError::internal(format!(
                    "shutdown listener aborted: {}",
                    e
                ))),
            },
            None => Ok(()),
        };
        shutdown.outcome = Some(outcome.clone());
        outcome
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
    }
}
