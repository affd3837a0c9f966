use std::time::Duration;
use vigil_core::{RemovalPolicy, Result, VigilError};
use vigil_leader::LockConfig;

/// Configuration for the watch loop
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Wait time of each blocking health query
    pub wait_time: Duration,

    /// Events buffered ahead of the consumer before the loop blocks
    pub channel_capacity: usize,

    /// Whether services that disappear are reported
    pub removals: RemovalPolicy,

    /// Save the snapshot after every poll, not only when it changed
    pub persist_unchanged: bool,

    /// Let any registry server answer health queries, not only the leader
    pub allow_stale: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            wait_time: Duration::from_secs(15),
            channel_capacity: 1,
            removals: RemovalPolicy::Ignore,
            persist_unchanged: false,
            allow_stale: true,
        }
    }
}

impl WatchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_wait_time(mut self, wait: Duration) -> Self {
        self.wait_time = wait;
        self
    }

    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn with_removals(mut self, removals: RemovalPolicy) -> Self {
        self.removals = removals;
        self
    }

    pub fn with_persist_unchanged(mut self, persist: bool) -> Self {
        self.persist_unchanged = persist;
        self
    }

    pub fn with_allow_stale(mut self, allow_stale: bool) -> Self {
        self.allow_stale = allow_stale;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.wait_time.is_zero() {
            return Err(VigilError::config("wait time must be positive"));
        }
        if self.channel_capacity == 0 {
            return Err(VigilError::config("channel capacity must be at least 1"));
        }
        Ok(())
    }
}

/// Everything a [`Monitor`](crate::Monitor) needs: how to elect, how to watch.
#[derive(Debug, Clone, Default)]
pub struct MonitorConfig {
    pub lock: LockConfig,
    pub watch: WatchConfig,
}

impl MonitorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_watch(mut self, watch: WatchConfig) -> Self {
        self.watch = watch;
        self
    }

    /// Puts the lock under `<prefix>/.lock`, leaving the state key to the
    /// caller's store.
    pub fn with_key_prefix(mut self, prefix: &str) -> Self {
        self.lock.key = format!("{}/.lock", prefix.trim_end_matches('/'));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WatchConfig::default();
        assert_eq!(config.wait_time, Duration::from_secs(15));
        assert_eq!(config.channel_capacity, 1);
        assert_eq!(config.removals, RemovalPolicy::Ignore);
        assert!(config.allow_stale);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(WatchConfig::default().with_channel_capacity(0).validate().is_err());
        assert!(WatchConfig::default()
            .with_wait_time(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_key_prefix() {
        let config = MonitorConfig::default().with_key_prefix("team-a/vigil/");
        assert_eq!(config.lock.key, "team-a/vigil/.lock");
    }
}
