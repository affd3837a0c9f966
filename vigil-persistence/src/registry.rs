use async_trait::async_trait;
use tracing::debug;
use vigil_core::{validate_key, AggregatedState, QueryOptions, Registry, Result, StateStore};

/// Key the snapshot is stored under unless configured otherwise.
pub const DEFAULT_STATE_KEY: &str = "vigil/state";

/// Keeps the snapshot in the registry's key/value store, next to the lock.
///
/// Uses plain get/put; the leader lock is what makes this single-writer.
#[derive(Debug, Clone)]
pub struct RegistryStateStore<R> {
    registry: R,
    key: String,
}

impl<R: Registry> RegistryStateStore<R> {
    pub fn new(registry: R) -> Self {
        Self {
            registry,
            key: DEFAULT_STATE_KEY.to_string(),
        }
    }

    /// Stores the snapshot under `key` instead; fails on keys the registry
    /// would not address as written.
    pub fn with_key(registry: R, key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        validate_key(&key)?;
        Ok(Self { registry, key })
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[async_trait]
impl<R: Registry> StateStore for RegistryStateStore<R> {
    async fn load(&self) -> Result<AggregatedState> {
        let (entry, _) = self
            .registry
            .kv_get(&self.key, &QueryOptions::default())
            .await?;

        match entry {
            Some(entry) if !entry.value.is_empty() => AggregatedState::from_bytes(&entry.value),
            _ => {
                debug!("No saved state under {}", self.key);
                Ok(AggregatedState::new())
            }
        }
    }

    async fn save(&self, state: &AggregatedState) -> Result<()> {
        let data = state.to_bytes()?;
        self.registry.kv_put(&self.key, &data).await?;
        debug!("Saved {} services under {}", state.len(), self.key);
        Ok(())
    }
}
