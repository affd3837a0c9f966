//! The long-polling watch loop.

use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use vigil_core::{
    aggregate, diff, AggregatedState, ChangeEvent, QueryOptions, Registry, Result, StateStore,
    VigilError, WaitIndex,
};
use vigil_leader::{Lease, LeaseState};

use crate::{EventSender, WatchConfig};

/// Turns blocking health queries into a stream of change events.
///
/// Each cycle: wait for the registry's health state to move past the
/// cursor, aggregate it per service, diff against the last snapshot, hand
/// the events to the channel, then persist. The snapshot is only saved
/// after every event of the cycle was handed over, so a crash replays
/// events rather than losing them.
pub struct Watcher<R, S> {
    registry: R,
    store: S,
    config: WatchConfig,
    events: EventSender,
    stop: watch::Receiver<bool>,
    lease: Option<Lease>,
}

enum Cycle {
    Continue,
    Stop,
}

impl<R: Registry, S: StateStore> Watcher<R, S> {
    pub fn new(
        registry: R,
        store: S,
        config: WatchConfig,
        events: EventSender,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            registry,
            store,
            config,
            events,
            stop,
            lease: None,
        }
    }

    /// Ties the loop to a leader lease; losing it ends the loop with
    /// [`VigilError::SessionExpired`].
    pub fn with_lease(mut self, lease: Lease) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Runs until stopped, the receiver goes away, or an error occurs.
    ///
    /// The outcome is recorded on the event channel before it is returned.
    pub async fn run(mut self) -> Result<()> {
        info!("Watch loop starting");
        let outcome = self.watch().await;
        match &outcome {
            Ok(()) => info!("Watch loop stopped"),
            Err(e) => error!("Watch loop failed: {}", e),
        }
        self.events.close(outcome.clone());
        outcome
    }

    async fn watch(&mut self) -> Result<()> {
        let mut previous = match self.store.load().await {
            Ok(state) => {
                info!("Loaded snapshot of {} services", state.len());
                state
            }
            Err(e) => {
                warn!("Failed to load snapshot, starting empty: {}", e);
                AggregatedState::new()
            }
        };
        let mut cursor = WaitIndex::ZERO;
        let mut first_cycle = true;

        loop {
            if let Cycle::Stop = self.check_continue()? {
                return Ok(());
            }

            let options = QueryOptions::blocking(cursor, self.config.wait_time)
                .with_stale(self.config.allow_stale);
            let (records, meta) = self.registry.health_state(&options).await?;

            if let Cycle::Stop = self.check_lease()? {
                return Ok(());
            }

            let next_cursor = cursor.advance(meta.last_index);
            if next_cursor == WaitIndex::ZERO && cursor != WaitIndex::ZERO {
                warn!(
                    "Registry index went backwards ({} -> {}), resetting cursor",
                    cursor, meta.last_index
                );
            }
            cursor = next_cursor;

            let next = aggregate(&records);
            let events = diff(&previous, &next, self.config.removals);
            if !events.is_empty() {
                debug!(
                    "{} changes across {} services at index {}",
                    events.len(),
                    next.len(),
                    cursor
                );
            }

            for event in events {
                if let Cycle::Stop = self.deliver(event).await? {
                    return Ok(());
                }
            }

            let next_state = next.state();
            if next_state != previous || first_cycle || self.config.persist_unchanged {
                self.store.save(&next_state).await?;
            }
            previous = next_state;
            first_cycle = false;
        }
    }

    /// Hands one event over, giving up if a stop arrives while the
    /// consumer is not keeping up.
    async fn deliver(&mut self, event: ChangeEvent) -> Result<Cycle> {
        let stop = &mut self.stop;
        tokio::select! {
            sent = self.events.send(event) => match sent {
                Ok(()) => Ok(Cycle::Continue),
                Err(VigilError::ChannelClosed) => {
                    info!("Event receiver dropped");
                    Ok(Cycle::Stop)
                }
                Err(e) => Err(e),
            },
            _ = stop.wait_for(|stopped| *stopped) => {
                info!("Stop requested during delivery, abandoning cycle");
                Ok(Cycle::Stop)
            }
        }
    }

    fn check_continue(&self) -> Result<Cycle> {
        // A dropped stop sender counts as a stop request
        if *self.stop.borrow() || self.stop.has_changed().is_err() {
            return Ok(Cycle::Stop);
        }
        if self.events.is_closed() {
            info!("Event receiver dropped");
            return Ok(Cycle::Stop);
        }
        self.check_lease()
    }

    fn check_lease(&self) -> Result<Cycle> {
        let Some(lease) = &self.lease else {
            return Ok(Cycle::Continue);
        };
        match lease.state() {
            LeaseState::Held => Ok(Cycle::Continue),
            LeaseState::Released => {
                info!("Leadership released, stopping");
                Ok(Cycle::Stop)
            }
            LeaseState::Lost { reason } => {
                error!("Leadership lost: {}", reason);
                Err(VigilError::session_expired(lease.session()))
            }
        }
    }
}
