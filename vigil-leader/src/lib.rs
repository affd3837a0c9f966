//! # Vigil Leader Lock
//!
//! Session-backed advisory lock that elects one Vigil replica as leader.
//!
//! This crate provides:
//! - Session creation with TTL, lock-delay and delete-on-invalidate behavior
//! - Background session renewal with bounded retry of transient failures
//! - Blocking acquisition of the lock key
//! - A [`Lease`] that tells the leader when its session has been lost
//! - Idempotent release of the key and session on shutdown
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use vigil_leader::{LeaderLock, LockConfig};
//! use vigil_testing::InMemoryRegistry;
//!
//! # tokio_test::block_on(async {
//! let registry = Arc::new(InMemoryRegistry::new());
//! let lock = LeaderLock::new(registry, LockConfig::default());
//!
//! let handle = lock.acquire().await?;
//! assert!(handle.is_held());
//!
//! handle.release().await?;
//! # Ok::<(), vigil_leader::LeaderError>(())
//! # });
//! ```

pub mod errors;
pub mod leader;
pub mod session;

pub use errors::{LeaderError, LeaderResult};
pub use leader::{LeaderLock, LockConfig, LockHandle};
pub use session::{Lease, LeaseState};
