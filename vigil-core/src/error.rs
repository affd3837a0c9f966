//! # Error Types
//!
//! Error handling shared by every Vigil crate.

use thiserror::Error;

/// Error types that can occur while talking to the registry, persisting
/// state or delivering change events.
///
/// # Error Categories
///
/// - **Connectivity**: the registry could not be reached
/// - **Session**: the coordination session is gone and leadership can no
///   longer be trusted
/// - **Serialization**: a payload or persisted snapshot could not be decoded
/// - **Channel**: the event channel was closed underneath the caller
///
/// The type is `Clone` so a terminal error can be stored in the event
/// channel and handed to the consumer.
///
/// # Examples
///
/// ```rust
/// use vigil_core::VigilError;
///
/// let error = VigilError::connectivity("connection refused");
/// assert!(error.is_retryable());
/// assert!(error.is_fatal());
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VigilError {
    /// Registry unreachable
    #[error("Connectivity error: {message}")]
    Connectivity { message: String },

    /// Session invalidated by TTL expiry or explicit destroy
    #[error("Session {session} expired")]
    SessionExpired { session: String },

    /// Encoding or decoding failure, including corrupt persisted state
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Event channel closed by the other side or by shutdown
    #[error("Event channel closed")]
    ChannelClosed,

    /// Registry answered with an unexpected status
    #[error("Registry error ({status}): {message}")]
    Registry { status: u16, message: String },

    /// Local persistence failure
    #[error("Persistence error: {message}")]
    Persistence { message: String },

    /// Invalid configuration value
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Unexpected internal error
    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Type alias for Results in the Vigil crates.
pub type Result<T> = std::result::Result<T, VigilError>;

impl VigilError {
    /// Creates a new connectivity error with the given message.
    pub fn connectivity(message: impl Into<String>) -> Self {
        Self::Connectivity {
            message: message.into(),
        }
    }

    /// Creates a new session expiry error for the given session id.
    pub fn session_expired(session: impl Into<String>) -> Self {
        Self::SessionExpired {
            session: session.into(),
        }
    }

    /// Creates a new serialization error with the given message.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a new registry error from an HTTP-like status code.
    pub fn registry(status: u16, message: impl Into<String>) -> Self {
        Self::Registry {
            status,
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Determines if this error condition is potentially transient.
    ///
    /// Only the leader lock's renewal task acts on this; the watch loop
    /// treats every registry error as fatal regardless.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity { .. })
            || matches!(self, Self::Registry { status, .. } if *status >= 500)
    }

    /// Whether this error must stop the process from acting as leader.
    ///
    /// Corrupt state is recoverable (load as empty) and a closed channel is
    /// the normal shutdown path.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Serialization { .. } | Self::ChannelClosed)
    }
}

impl From<serde_json::Error> for VigilError {
    fn from(err: serde_json::Error) -> Self {
        VigilError::serialization(err.to_string())
    }
}

impl From<std::io::Error> for VigilError {
    fn from(err: std::io::Error) -> Self {
        VigilError::persistence(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(VigilError::connectivity("refused").is_retryable());
        assert!(VigilError::registry(503, "no leader").is_retryable());
        assert!(!VigilError::registry(404, "missing").is_retryable());
        assert!(!VigilError::session_expired("abc").is_retryable());

        assert!(VigilError::session_expired("abc").is_fatal());
        assert!(!VigilError::serialization("bad json").is_fatal());
        assert!(!VigilError::ChannelClosed.is_fatal());
    }

    #[test]
    fn test_from_serde_error() {
        let err: VigilError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, VigilError::Serialization { .. }));
    }
}
