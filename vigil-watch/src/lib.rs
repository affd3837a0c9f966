//! # Vigil Watch
//!
//! The leader's side of Vigil: a long-polling loop over the registry's
//! health state that emits a deduplicated feed of service status
//! transitions, persisting what it has reported so restarts and failovers
//! do not repeat it.
//!
//! - [`Watcher`] - the poll, aggregate, diff, emit, persist loop
//! - [`event_channel`] - bounded event queue with an explicit terminal state
//! - [`Monitor`] - acquires leadership, runs the watcher, releases on exit
//! - [`forward`] - pumps events into a [`Notifier`](vigil_core::Notifier)
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use vigil_core::{HealthRecord, Status};
//! use vigil_persistence::InMemoryStateStore;
//! use vigil_testing::InMemoryRegistry;
//! use vigil_watch::{Monitor, MonitorConfig, WatchConfig};
//!
//! # tokio_test::block_on(async {
//! let registry = Arc::new(InMemoryRegistry::new());
//! registry.set_check(HealthRecord::new("node-1", "web", "http", Status::Critical));
//!
//! let config = MonitorConfig::default()
//!     .with_watch(WatchConfig::default().with_wait_time(Duration::from_millis(100)));
//! let (monitor, mut events) =
//!     Monitor::start(registry, InMemoryStateStore::new(), config).await?;
//!
//! let event = events.recv().await?.expect("first poll reports the service");
//! assert_eq!(event.new_status(), Some(Status::Critical));
//!
//! monitor.shutdown().await?;
//! # Ok::<(), vigil_core::VigilError>(())
//! # });
//! ```

pub mod channel;
pub mod config;
pub mod dispatch;
pub mod monitor;
pub mod watcher;

pub use channel::{event_channel, EventReceiver, EventSender, TerminalState};
pub use config::{MonitorConfig, WatchConfig};
pub use dispatch::{forward, LogNotifier};
pub use monitor::Monitor;
pub use watcher::Watcher;
