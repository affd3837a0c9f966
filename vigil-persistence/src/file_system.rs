use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use vigil_core::{AggregatedState, Result, StateStore, VigilError};

/// Keeps the snapshot in a single file on local disk.
///
/// For deployments where one replica runs alone, or where the registry's
/// key/value store should not be written to.
#[derive(Debug, Clone)]
pub struct FileStateStore {
    state_file_path: PathBuf,
}

impl FileStateStore {
    /// Create a store writing `state.json` under `data_dir`.
    ///
    /// # Errors
    /// * Returns error if the data directory cannot be created
    pub async fn new<P: AsRef<Path>>(data_dir: P) -> Result<Self> {
        let data_dir = data_dir.as_ref();

        if !data_dir.exists() {
            fs::create_dir_all(data_dir).await.map_err(|e| {
                VigilError::persistence(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(Self {
            state_file_path: data_dir.join("state.json"),
        })
    }

    pub fn path(&self) -> &Path {
        &self.state_file_path
    }
}

#[async_trait]
impl StateStore for FileStateStore {
    async fn load(&self) -> Result<AggregatedState> {
        match fs::read(&self.state_file_path).await {
            Ok(data) if data.is_empty() => Ok(AggregatedState::new()),
            Ok(data) => AggregatedState::from_bytes(&data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(AggregatedState::new()),
            Err(e) => Err(VigilError::persistence(format!(
                "Failed to read state file {}: {}",
                self.state_file_path.display(),
                e
            ))),
        }
    }

    async fn save(&self, state: &AggregatedState) -> Result<()> {
        let data = state.to_bytes()?;
        let temp_file_path = self.state_file_path.with_extension("tmp");

        fs::write(&temp_file_path, &data).await.map_err(|e| {
            VigilError::persistence(format!("Failed to write state to temp file: {}", e))
        })?;

        // Readers never see a half-written snapshot
        fs::rename(&temp_file_path, &self.state_file_path)
            .await
            .map_err(|e| {
                VigilError::persistence(format!("Failed to rename temp file to state file: {}", e))
            })?;

        Ok(())
    }
}
