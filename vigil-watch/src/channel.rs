//! Bounded change-event channel with an explicit outcome.
//!
//! A plain mpsc channel only tells the consumer that the producer is gone.
//! Here the producer records why before it lets go, so the consumer can tell
//! a requested shutdown from a failure.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use vigil_core::{ChangeEvent, Result, VigilError};

/// How the producing side of an event channel ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalState {
    Open,
    ClosedClean,
    ClosedError(VigilError),
}

impl TerminalState {
    pub fn is_open(&self) -> bool {
        matches!(self, TerminalState::Open)
    }
}

#[derive(Debug)]
struct Shared {
    terminal: Mutex<TerminalState>,
}

impl Shared {
    /// Records the outcome unless one is already set.
    fn finish(&self, outcome: TerminalState) -> bool {
        let mut terminal = self.terminal.lock();
        if terminal.is_open() {
            *terminal = outcome;
            true
        } else {
            false
        }
    }
}

/// Create a bounded event channel holding at most `capacity` undelivered
/// events (minimum 1).
pub fn event_channel(capacity: usize) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared {
        terminal: Mutex::new(TerminalState::Open),
    });
    (
        EventSender {
            tx: Some(tx),
            shared: Arc::clone(&shared),
        },
        EventReceiver {
            rx,
            shared,
            error_reported: false,
        },
    )
}

/// Producing half, owned by the watch loop.
#[derive(Debug)]
pub struct EventSender {
    tx: Option<mpsc::Sender<ChangeEvent>>,
    shared: Arc<Shared>,
}

impl EventSender {
    /// Hands an event over, waiting while the buffer is full.
    ///
    /// Fails with [`VigilError::ChannelClosed`] once the receiver is gone or
    /// this sender was closed.
    pub async fn send(&self, event: ChangeEvent) -> Result<()> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(VigilError::ChannelClosed);
        };
        tx.send(event).await.map_err(|_| VigilError::ChannelClosed)
    }

    /// Ends the channel with `outcome`. Only the first call has an effect;
    /// returns whether this call set the outcome.
    pub fn close(&mut self, outcome: Result<()>) -> bool {
        let state = match outcome {
            Ok(()) => TerminalState::ClosedClean,
            Err(e) => TerminalState::ClosedError(e),
        };
        let set = self.shared.finish(state);
        // Outcome first, then the disconnect the receiver wakes on
        self.tx = None;
        set
    }

    pub fn is_closed(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }
}

impl Drop for EventSender {
    fn drop(&mut self) {
        if self
            .shared
            .finish(TerminalState::ClosedError(VigilError::internal(
                "event sender dropped without close",
            )))
        {
            debug!("Event sender dropped while open");
        }
        self.tx = None;
    }
}

/// Consuming half.
#[derive(Debug)]
pub struct EventReceiver {
    rx: mpsc::Receiver<ChangeEvent>,
    shared: Arc<Shared>,
    error_reported: bool,
}

impl EventReceiver {
    /// Next event.
    ///
    /// Buffered events are always delivered first. Afterwards this returns
    /// `Ok(None)` for a clean close, or the terminal error exactly once and
    /// `Ok(None)` from then on.
    pub async fn recv(&mut self) -> Result<Option<ChangeEvent>> {
        if let Some(event) = self.rx.recv().await {
            return Ok(Some(event));
        }

        let terminal = self.shared.terminal.lock().clone();
        match terminal {
            TerminalState::ClosedError(e) if !self.error_reported => {
                self.error_reported = true;
                Err(e)
            }
            _ => Ok(None),
        }
    }

    /// Outcome of the producer so far; `Open` while it is running.
    pub fn terminal_state(&self) -> TerminalState {
        self.shared.terminal.lock().clone()
    }
}
