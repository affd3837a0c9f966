//! Coordination client interface.
//!
//! The registry is an external service that already provides sessions with
//! TTL liveness, atomic acquire/release on keys and blocking reads. Vigil
//! never re-implements it; everything above this trait is written against
//! it so it can run on Consul or on the in-memory simulation used by tests.

use async_trait::async_trait;
use std::time::Duration;

use crate::{HealthRecord, Result, VigilError, WaitIndex};

/// Registry-issued session identifier.
pub type SessionId = String;

/// Checks that `key` names one registry key as written.
///
/// Keys travel as URL paths, where `.` and `..` segments would be collapsed
/// into a different key, so they are rejected along with empty keys and
/// leading slashes.
pub fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(VigilError::config("registry key is empty"));
    }
    if key.starts_with('/') {
        return Err(VigilError::config(format!(
            "registry key {} must not start with '/'",
            key
        )));
    }
    if key.split('/').any(|segment| segment == "." || segment == "..") {
        return Err(VigilError::config(format!(
            "registry key {} contains a '.' or '..' segment",
            key
        )));
    }
    Ok(())
}

/// What the registry does with keys held by a session when it is invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionBehavior {
    /// Keys stay, their holder is cleared.
    Release,
    /// Keys are deleted.
    Delete,
}

impl SessionBehavior {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionBehavior::Release => "release",
            SessionBehavior::Delete => "delete",
        }
    }
}

/// Parameters for a new session.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    pub name: String,
    pub ttl: Duration,
    /// Window after invalidation during which held keys cannot be re-acquired.
    pub lock_delay: Duration,
    pub behavior: SessionBehavior,
}

/// A key's value together with the index of its last modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvEntry {
    pub key: String,
    pub value: Vec<u8>,
    /// Session currently holding the key, if any.
    pub session: Option<SessionId>,
    pub modify_index: WaitIndex,
}

/// Options for a (possibly blocking) read.
///
/// A zero `wait_index` never blocks. Otherwise the call returns once the
/// registry's index moves past `wait_index` or `wait_time` elapses.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryOptions {
    pub wait_index: WaitIndex,
    pub wait_time: Option<Duration>,
    /// Accept a possibly stale answer from any registry server.
    pub allow_stale: bool,
}

impl QueryOptions {
    pub fn blocking(wait_index: WaitIndex, wait_time: Duration) -> Self {
        Self {
            wait_index,
            wait_time: Some(wait_time),
            allow_stale: false,
        }
    }

    pub fn with_stale(mut self, allow_stale: bool) -> Self {
        self.allow_stale = allow_stale;
        self
    }
}

/// Metadata returned with every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueryMeta {
    pub last_index: WaitIndex,
}

#[async_trait]
pub trait Registry: Send + Sync {
    async fn create_session(&self, spec: &SessionSpec) -> Result<SessionId>;

    /// Fails with `SessionExpired` once the session is gone.
    async fn renew_session(&self, session: &str) -> Result<()>;

    async fn destroy_session(&self, session: &str) -> Result<()>;

    async fn kv_get(&self, key: &str, options: &QueryOptions)
        -> Result<(Option<KvEntry>, QueryMeta)>;

    async fn kv_put(&self, key: &str, value: &[u8]) -> Result<()>;

    /// Atomically takes `key` for `session` if no other session holds it.
    async fn kv_acquire(&self, key: &str, value: &[u8], session: &str) -> Result<bool>;

    async fn kv_release(&self, key: &str, session: &str) -> Result<bool>;

    /// Every check in the catalog, in any state.
    async fn health_state(&self, options: &QueryOptions)
        -> Result<(Vec<HealthRecord>, QueryMeta)>;
}

#[async_trait]
impl<R: Registry + ?Sized> Registry for std::sync::Arc<R> {
    async fn create_session(&self, spec: &SessionSpec) -> Result<SessionId> {
        (**self).create_session(spec).await
    }

    async fn renew_session(&self, session: &str) -> Result<()> {
        (**self).renew_session(session).await
    }

    async fn destroy_session(&self, session: &str) -> Result<()> {
        (**self).destroy_session(session).await
    }

    async fn kv_get(
        &self,
        key: &str,
        options: &QueryOptions,
    ) -> Result<(Option<KvEntry>, QueryMeta)> {
        (**self).kv_get(key, options).await
    }

    async fn kv_put(&self, key: &str, value: &[u8]) -> Result<()> {
        (**self).kv_put(key, value).await
    }

    async fn kv_acquire(&self, key: &str, value: &[u8], session: &str) -> Result<bool> {
        (**self).kv_acquire(key, value, session).await
    }

    async fn kv_release(&self, key: &str, session: &str) -> Result<bool> {
        (**self).kv_release(key, session).await
    }

    async fn health_state(
        &self,
        options: &QueryOptions,
    ) -> Result<(Vec<HealthRecord>, QueryMeta)> {
        (**self).health_state(options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("vigil/.lock").is_ok());
        assert!(validate_key("team a/vigil/state").is_ok());
        assert!(validate_key("a/..b/c").is_ok());

        for bad in ["", "/vigil/state", "a/../b", "./state", "vigil/.", "vigil/.."] {
            assert!(
                matches!(validate_key(bad), Err(VigilError::Config { .. })),
                "{:?} should be rejected",
                bad
            );
        }
    }
}
