//! # Vigil Core
//!
//! Building blocks shared by every Vigil crate:
//!
//! - **Types**: health records, service keys, aggregated state, change events
//! - **Registry**: the coordination client trait (sessions, locks, KV,
//!   blocking health queries)
//! - **Aggregation**: worst-status reduction and change detection
//! - **Persistence**: the state store trait
//! - **Notify**: severity and message formatting for outbound senders
//! - **Error Handling**: [`VigilError`] and the [`Result`] alias
//!
//! ```rust
//! use vigil_core::{aggregate, diff, AggregatedState, HealthRecord, RemovalPolicy, Status};
//!
//! let records = vec![
//!     HealthRecord::new("node-1", "web", "http", Status::Passing),
//!     HealthRecord::new("node-1", "web", "tcp", Status::Critical),
//! ];
//! let next = aggregate(&records);
//! let events = diff(&AggregatedState::new(), &next, RemovalPolicy::Ignore);
//! assert_eq!(events.len(), 1);
//! ```

pub mod aggregate;
pub mod error;
pub mod notify;
pub mod persistence;
pub mod registry;
pub mod types;

pub use aggregate::{aggregate, diff, Aggregate, RemovalPolicy, ServiceHealth};
pub use error::*;
pub use notify::{format_event, Notifier, Severity};
pub use persistence::StateStore;
pub use registry::{
    validate_key, KvEntry, QueryMeta, QueryOptions, Registry, SessionBehavior, SessionId,
    SessionSpec,
};
pub use types::*;
