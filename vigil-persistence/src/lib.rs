//! # Vigil Persistence
//!
//! Stores for the last aggregated health state told downstream, so a
//! restarted or newly elected leader does not replay transitions that were
//! already reported.
//!
//! ## Implementations
//!
//! - [`RegistryStateStore`] - snapshot kept under a registry key (default `vigil/state`)
//! - [`FileStateStore`] - snapshot kept in a local file, replaced atomically
//! - [`InMemoryStateStore`] - snapshot kept in memory (testing/non-persistent)
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vigil_core::{AggregatedState, ServiceKey, StateStore, Status};
//! use vigil_persistence::RegistryStateStore;
//! use vigil_testing::InMemoryRegistry;
//!
//! # tokio_test::block_on(async {
//! let store = RegistryStateStore::new(Arc::new(InMemoryRegistry::new()));
//! assert!(store.load().await.unwrap().is_empty());
//!
//! let mut state = AggregatedState::new();
//! state.insert(ServiceKey::new("node-1", "web"), Status::Critical);
//! store.save(&state).await.unwrap();
//!
//! assert_eq!(store.load().await.unwrap(), state);
//! # });
//! ```

pub mod file_system;
pub mod in_memory;
pub mod registry;

pub use file_system::FileStateStore;
pub use in_memory::InMemoryStateStore;
pub use registry::{RegistryStateStore, DEFAULT_STATE_KEY};
