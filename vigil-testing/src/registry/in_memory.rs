use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{timeout, Instant};
use tracing::debug;
use uuid::Uuid;

use vigil_core::{
    HealthRecord, KvEntry, QueryMeta, QueryOptions, Registry, Result, SessionBehavior, SessionId,
    SessionSpec, VigilError, WaitIndex,
};

use crate::fault_injection::{FaultPlan, Operation};

/// Wait applied to blocking reads that do not specify one.
const DEFAULT_WAIT: Duration = Duration::from_secs(300);

#[derive(Debug)]
struct SessionEntry {
    spec: SessionSpec,
    expires_at: Instant,
}

#[derive(Debug, Clone)]
struct KvSlot {
    value: Vec<u8>,
    session: Option<SessionId>,
    modify_index: u64,
}

type CheckId = (String, String, String);

#[derive(Debug, Default)]
struct RegistryState {
    /// Raft-like global index, bumped on every write.
    index: u64,
    sessions: HashMap<SessionId, SessionEntry>,
    kv: BTreeMap<String, KvSlot>,
    /// Last index at which each key changed, deletions included.
    kv_index: HashMap<String, u64>,
    lock_delays: HashMap<String, Instant>,
    checks: BTreeMap<CheckId, HealthRecord>,
    checks_index: u64,
}

impl RegistryState {
    fn bump(&mut self) -> u64 {
        self.index += 1;
        self.index
    }

    fn touch_key(&mut self, key: &str) -> u64 {
        let index = self.bump();
        self.kv_index.insert(key.to_string(), index);
        index
    }

    fn touch_checks(&mut self) {
        self.checks_index = self.bump();
    }

    fn session_valid(&self, session: &str) -> bool {
        self.sessions.contains_key(session)
    }

    /// Drops a session and applies its behavior to every key it holds.
    fn invalidate(&mut self, session: &str, now: Instant) -> bool {
        let Some(entry) = self.sessions.remove(session) else {
            return false;
        };

        let held: Vec<String> = self
            .kv
            .iter()
            .filter(|(_, slot)| slot.session.as_deref() == Some(session))
            .map(|(key, _)| key.clone())
            .collect();

        for key in held {
            match entry.spec.behavior {
                SessionBehavior::Delete => {
                    self.kv.remove(&key);
                }
                SessionBehavior::Release => {
                    if let Some(slot) = self.kv.get_mut(&key) {
                        slot.session = None;
                    }
                }
            }
            let index = self.touch_key(&key);
            if let Some(slot) = self.kv.get_mut(&key) {
                slot.modify_index = index;
            }
            if !entry.spec.lock_delay.is_zero() {
                self.lock_delays
                    .insert(key.clone(), now + entry.spec.lock_delay);
            }
        }
        true
    }

    fn reap_expired(&mut self, now: Instant) {
        let expired: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, entry)| entry.expires_at <= now)
            .map(|(id, _)| id.clone())
            .collect();
        for id in expired {
            debug!("Session {} expired by TTL", id);
            self.invalidate(&id, now);
        }
    }
}

/// In-process simulation of the coordination registry.
///
/// Models what the leader lock and watch loop depend on: sessions with TTL,
/// lock-delay and delete/release behavior, atomic acquire/release, a global
/// modify index and blocking reads that return on change or after the wait
/// time. TTL expiry is evaluated lazily on every call.
///
/// Faults can be injected per operation, or the whole registry can be taken
/// offline to simulate a partition.
#[derive(Debug)]
pub struct InMemoryRegistry {
    state: Mutex<RegistryState>,
    faults: Mutex<FaultPlan>,
    changes: watch::Sender<u64>,
}

impl Default for InMemoryRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            // Registry indexes start above zero; zero means "do not block".
            state: Mutex::new(RegistryState {
                index: 1,
                ..Default::default()
            }),
            faults: Mutex::new(FaultPlan::default()),
            changes,
        }
    }

    // Simulation controls

    /// Adds or replaces a check, keyed by node, service id and check id.
    pub fn set_check(&self, record: HealthRecord) {
        let id = (
            record.node.clone(),
            record.service_id.clone(),
            record.check_id.clone(),
        );
        let mut state = self.state.lock();
        if state.checks.get(&id) == Some(&record) {
            return;
        }
        state.checks.insert(id, record);
        state.touch_checks();
        self.publish(&state);
    }

    pub fn remove_check(&self, node: &str, service_id: &str, check_id: &str) {
        let id = (node.to_string(), service_id.to_string(), check_id.to_string());
        let mut state = self.state.lock();
        if state.checks.remove(&id).is_some() {
            state.touch_checks();
            self.publish(&state);
        }
    }

    /// Removes every check registered for a service.
    pub fn deregister_service(&self, node: &str, service_id: &str) {
        let mut state = self.state.lock();
        let before = state.checks.len();
        state
            .checks
            .retain(|(n, s, _), _| !(n == node && s == service_id));
        if state.checks.len() != before {
            state.touch_checks();
            self.publish(&state);
        }
    }

    /// Invalidates a session as if its TTL had run out.
    pub fn expire_session(&self, session: &str) -> bool {
        let mut state = self.state.lock();
        let expired = state.invalidate(session, Instant::now());
        if expired {
            self.publish(&state);
        }
        expired
    }

    pub fn set_offline(&self, offline: bool) {
        self.faults.lock().set_offline(offline);
    }

    /// Fails the next call of `operation` with `error`.
    pub fn inject_fault(&self, operation: Operation, error: VigilError) {
        self.faults.lock().inject(operation, error);
    }

    pub fn call_count(&self, operation: Operation) -> u64 {
        self.faults.lock().calls(operation)
    }

    // Inspection

    pub fn holder(&self, key: &str) -> Option<SessionId> {
        self.state.lock().kv.get(key).and_then(|slot| slot.session.clone())
    }

    pub fn value(&self, key: &str) -> Option<Vec<u8>> {
        self.state.lock().kv.get(key).map(|slot| slot.value.clone())
    }

    /// Writes a key directly, bypassing fault injection.
    pub fn put_raw(&self, key: &str, value: &[u8]) {
        let mut state = self.state.lock();
        Self::write_value(&mut state, key, value.to_vec(), None);
        self.publish(&state);
    }

    pub fn active_sessions(&self) -> Vec<SessionId> {
        let mut state = self.state.lock();
        self.reap(&mut state, Instant::now());
        state.sessions.keys().cloned().collect()
    }

    // Internals

    fn check_fault(&self, operation: Operation) -> Result<()> {
        match self.faults.lock().on_call(operation) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn publish(&self, state: &RegistryState) {
        self.changes.send_replace(state.index);
    }

    fn reap(&self, state: &mut RegistryState, now: Instant) {
        let before = state.index;
        state.reap_expired(now);
        if state.index != before {
            self.publish(state);
        }
    }

    fn write_value(state: &mut RegistryState, key: &str, value: Vec<u8>, session: Option<SessionId>) {
        let index = state.touch_key(key);
        let slot = state.kv.entry(key.to_string()).or_insert_with(|| KvSlot {
            value: Vec::new(),
            session: None,
            modify_index: index,
        });
        slot.value = value;
        if session.is_some() {
            slot.session = session;
        }
        slot.modify_index = index;
    }

    /// Reaps expired sessions, then blocks until `index_of` moves past the
    /// requested wait index or the wait time elapses.
    async fn block_until<F>(&self, options: &QueryOptions, index_of: F)
    where
        F: Fn(&RegistryState) -> u64 + Send + Sync,
    {
        {
            let mut state = self.state.lock();
            self.reap(&mut state, Instant::now());
        }

        let wait_index = options.wait_index.value();
        if wait_index == 0 {
            return;
        }

        let mut changes = self.changes.subscribe();
        let wait = options.wait_time.unwrap_or(DEFAULT_WAIT);
        let _ = timeout(wait, async {
            loop {
                let current = {
                    let state = self.state.lock();
                    index_of(&state)
                };
                if current > wait_index {
                    break;
                }
                if changes.changed().await.is_err() {
                    break;
                }
            }
        })
        .await;
    }
}

#[async_trait]
impl Registry for InMemoryRegistry {
    async fn create_session(&self, spec: &SessionSpec) -> Result<SessionId> {
        self.check_fault(Operation::CreateSession)?;

        let id = Uuid::new_v4().to_string();
        let mut state = self.state.lock();
        state.sessions.insert(
            id.clone(),
            SessionEntry {
                spec: spec.clone(),
                expires_at: Instant::now() + spec.ttl,
            },
        );
        state.bump();
        self.publish(&state);
        debug!("Session {} created ({:?})", id, spec.name);
        Ok(id)
    }

    async fn renew_session(&self, session: &str) -> Result<()> {
        self.check_fault(Operation::RenewSession)?;

        let now = Instant::now();
        let mut state = self.state.lock();
        self.reap(&mut state, now);
        match state.sessions.get_mut(session) {
            Some(entry) => {
                entry.expires_at = now + entry.spec.ttl;
                Ok(())
            }
            None => Err(VigilError::session_expired(session)),
        }
    }

    async fn destroy_session(&self, session: &str) -> Result<()> {
        self.check_fault(Operation::DestroySession)?;

        let mut state = self.state.lock();
        if state.invalidate(session, Instant::now()) {
            state.bump();
            self.publish(&state);
        }
        Ok(())
    }

    async fn kv_get(
        &self,
        key: &str,
        options: &QueryOptions,
    ) -> Result<(Option<KvEntry>, QueryMeta)> {
        self.check_fault(Operation::KvGet)?;

        self.block_until(options, |state| {
            state.kv_index.get(key).copied().unwrap_or(0)
        })
        .await;

        let state = self.state.lock();
        let entry = state.kv.get(key).map(|slot| KvEntry {
            key: key.to_string(),
            value: slot.value.clone(),
            session: slot.session.clone(),
            modify_index: WaitIndex::new(slot.modify_index),
        });
        let last_index = state.kv_index.get(key).copied().unwrap_or(state.index);
        Ok((
            entry,
            QueryMeta {
                last_index: WaitIndex::new(last_index.max(1)),
            },
        ))
    }

    async fn kv_put(&self, key: &str, value: &[u8]) -> Result<()> {
        self.check_fault(Operation::KvPut)?;

        let mut state = self.state.lock();
        Self::write_value(&mut state, key, value.to_vec(), None);
        self.publish(&state);
        Ok(())
    }

    async fn kv_acquire(&self, key: &str, value: &[u8], session: &str) -> Result<bool> {
        self.check_fault(Operation::KvAcquire)?;

        let now = Instant::now();
        let mut state = self.state.lock();
        self.reap(&mut state, now);

        if !state.session_valid(session) {
            return Err(VigilError::session_expired(session));
        }
        if let Some(until) = state.lock_delays.get(key) {
            if *until > now {
                return Ok(false);
            }
        }
        if let Some(holder) = state.kv.get(key).and_then(|slot| slot.session.as_deref()) {
            if holder != session {
                return Ok(false);
            }
        }

        Self::write_value(&mut state, key, value.to_vec(), Some(session.to_string()));
        self.publish(&state);
        Ok(true)
    }

    async fn kv_release(&self, key: &str, session: &str) -> Result<bool> {
        self.check_fault(Operation::KvRelease)?;

        let mut state = self.state.lock();
        self.reap(&mut state, Instant::now());

        let held = state
            .kv
            .get(key)
            .map(|slot| slot.session.as_deref() == Some(session))
            .unwrap_or(false);
        if !held {
            return Ok(false);
        }

        let index = state.touch_key(key);
        if let Some(slot) = state.kv.get_mut(key) {
            slot.session = None;
            slot.modify_index = index;
        }
        self.publish(&state);
        Ok(true)
    }

    async fn health_state(
        &self,
        options: &QueryOptions,
    ) -> Result<(Vec<HealthRecord>, QueryMeta)> {
        self.check_fault(Operation::HealthState)?;

        self.block_until(options, |state| state.checks_index).await;

        let state = self.state.lock();
        let records = state.checks.values().cloned().collect();
        Ok((
            records,
            QueryMeta {
                last_index: WaitIndex::new(state.checks_index.max(1)),
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::Status;

    fn spec(ttl: Duration, lock_delay: Duration) -> SessionSpec {
        SessionSpec {
            name: "test".to_string(),
            ttl,
            lock_delay,
            behavior: SessionBehavior::Delete,
        }
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let registry = InMemoryRegistry::new();
        let a = registry.create_session(&spec(Duration::from_secs(10), Duration::ZERO)).await.unwrap();
        let b = registry.create_session(&spec(Duration::from_secs(10), Duration::ZERO)).await.unwrap();

        assert!(registry.kv_acquire("lock", b"a", &a).await.unwrap());
        assert!(!registry.kv_acquire("lock", b"b", &b).await.unwrap());
        assert_eq!(registry.holder("lock"), Some(a.clone()));

        assert!(!registry.kv_release("lock", &b).await.unwrap());
        assert!(registry.kv_release("lock", &a).await.unwrap());
        assert!(registry.kv_acquire("lock", b"b", &b).await.unwrap());
    }

    #[tokio::test]
    async fn test_session_destroy_deletes_held_keys_and_applies_lock_delay() {
        let registry = InMemoryRegistry::new();
        let a = registry.create_session(&spec(Duration::from_secs(10), Duration::from_secs(60))).await.unwrap();
        let b = registry.create_session(&spec(Duration::from_secs(10), Duration::ZERO)).await.unwrap();

        assert!(registry.kv_acquire("lock", b"a", &a).await.unwrap());
        registry.destroy_session(&a).await.unwrap();

        assert!(registry.value("lock").is_none());
        assert!(!registry.kv_acquire("lock", b"b", &b).await.unwrap());
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let registry = InMemoryRegistry::new();
        let a = registry.create_session(&spec(Duration::from_millis(20), Duration::ZERO)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;

        let err = registry.renew_session(&a).await.unwrap_err();
        assert!(matches!(err, VigilError::SessionExpired { .. }));
    }

    #[tokio::test]
    async fn test_blocking_health_query_wakes_on_change() {
        let registry = std::sync::Arc::new(InMemoryRegistry::new());
        registry.set_check(HealthRecord::new("n1", "s1", "http", Status::Passing));

        let (_, meta) = registry.health_state(&QueryOptions::default()).await.unwrap();

        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .health_state(&QueryOptions::blocking(meta.last_index, Duration::from_secs(5)))
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        registry.set_check(HealthRecord::new("n1", "s1", "http", Status::Critical));

        let (records, next) = waiter.await.unwrap().unwrap();
        assert!(next.last_index > meta.last_index);
        assert_eq!(records[0].status, Status::Critical);
    }

    #[tokio::test]
    async fn test_blocking_query_times_out_without_change() {
        let registry = InMemoryRegistry::new();
        registry.set_check(HealthRecord::new("n1", "s1", "http", Status::Passing));
        let (_, meta) = registry.health_state(&QueryOptions::default()).await.unwrap();

        let started = Instant::now();
        let (_, again) = registry
            .health_state(&QueryOptions::blocking(meta.last_index, Duration::from_millis(50)))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert_eq!(again.last_index, meta.last_index);
    }

    #[tokio::test]
    async fn test_injected_fault() {
        let registry = InMemoryRegistry::new();
        registry.inject_fault(Operation::KvPut, VigilError::connectivity("down"));
        assert!(registry.kv_put("k", b"v").await.is_err());
        assert!(registry.kv_put("k", b"v").await.is_ok());
        assert_eq!(registry.value("k"), Some(b"v".to_vec()));
    }
}
