use async_trait::async_trait;

use crate::{AggregatedState, Result};

/// Durable home of the last aggregated state told downstream.
///
/// Implementations assume a single writer; the leader lock is what keeps
/// other replicas from saving concurrently.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Load the last saved state.
    ///
    /// # Returns
    /// * `Ok(state)` with the saved state, or an empty state if none exists
    /// * `Err(VigilError::Serialization)` if the stored bytes are corrupt
    /// * `Err(..)` for any other failure reaching the backing store
    async fn load(&self) -> Result<AggregatedState>;

    /// Replace the saved state (last write wins).
    async fn save(&self, state: &AggregatedState) -> Result<()>;
}
