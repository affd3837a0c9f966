use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use vigil_core::{AggregatedState, Result, StateStore};

/// Snapshot held in memory; lost on restart.
///
/// Clones share the same slot, so a test can keep one clone to inspect
/// what the watch loop saved.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStateStore {
    state: Arc<RwLock<Option<AggregatedState>>>,
    saves: Arc<RwLock<u64>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store, as if a previous leader had saved `state`.
    pub fn with_state(state: AggregatedState) -> Self {
        let store = Self::new();
        *store.state.write() = Some(state);
        store
    }

    pub fn snapshot(&self) -> Option<AggregatedState> {
        self.state.read().clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> u64 {
        *self.saves.read()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn load(&self) -> Result<AggregatedState> {
        Ok(self.state.read().clone().unwrap_or_default())
    }

    async fn save(&self, state: &AggregatedState) -> Result<()> {
        *self.state.write() = Some(state.clone());
        *self.saves.write() += 1;
        Ok(())
    }
}
