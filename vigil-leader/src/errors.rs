//! Error types for leader lock operations.

use thiserror::Error;
use vigil_core::VigilError;

/// Result type for leader lock operations
pub type LeaderResult<T> = Result<T, LeaderError>;

/// Errors that can occur while acquiring, holding or releasing leadership
#[derive(Error, Debug)]
pub enum LeaderError {
    /// The registry refused or failed to create a session
    #[error("Session creation failed: {source}")]
    SessionCreation { source: VigilError },

    /// The lock key could not be acquired
    #[error("Lock acquisition on {key} failed: {source}")]
    Acquisition { key: String, source: VigilError },

    /// The session backing the lock is gone
    #[error("Leadership lost for session {session}: {reason}")]
    LeaseLost { session: String, reason: String },

    /// Destroying the session on shutdown failed
    #[error("Lock release failed: {reason}")]
    Release { reason: String },

    /// Acquisition was abandoned on request before the lock was taken
    #[error("Lock acquisition cancelled")]
    Cancelled,

    /// Configuration error
    #[error("Configuration error: {reason}")]
    ConfigError { reason: String },

    /// Any other registry failure
    #[error(transparent)]
    Registry(#[from] VigilError),
}

impl From<LeaderError> for VigilError {
    fn from(err: LeaderError) -> Self {
        match err {
            LeaderError::SessionCreation { source } => source,
            LeaderError::Acquisition { source, .. } => source,
            LeaderError::LeaseLost { session, .. } => VigilError::session_expired(session),
            LeaderError::Release { reason } => VigilError::internal(reason),
            LeaderError::Cancelled => VigilError::ChannelClosed,
            LeaderError::ConfigError { reason } => VigilError::config(reason),
            LeaderError::Registry(source) => source,
        }
    }
}
