//! # Core Types
//!
//! Health records as reported by the registry, the per-service aggregated
//! view built from them, and the change events derived from that view.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::VigilError;

/// Status of a single check or of an aggregated service.
///
/// Variants are declared in severity order, so the derived `Ord` is the
/// severity order used for aggregation:
/// `Passing < Warning < Critical < Maintenance`.
///
/// # Examples
///
/// ```rust
/// use vigil_core::Status;
///
/// assert!(Status::Passing < Status::Warning);
/// assert!(Status::Critical < Status::Maintenance);
/// assert_eq!("critical".parse::<Status>().unwrap(), Status::Critical);
/// ```
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Passing,
    Warning,
    Critical,
    Maintenance,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Passing => "passing",
            Status::Warning => "warning",
            Status::Critical => "critical",
            Status::Maintenance => "maintenance",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passing" => Ok(Status::Passing),
            "warning" => Ok(Status::Warning),
            "critical" => Ok(Status::Critical),
            "maintenance" => Ok(Status::Maintenance),
            other => Err(VigilError::serialization(format!(
                "unknown health status {:?}",
                other
            ))),
        }
    }
}

/// Identity of one monitored service instance.
///
/// Always kept as a structured pair; neither field is ever joined with a
/// delimiter, so ids containing `:` or `/` cannot collide.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ServiceKey {
    pub node: String,
    pub service_id: String,
}

impl ServiceKey {
    pub fn new(node: impl Into<String>, service_id: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            service_id: service_id.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.node, self.service_id)
    }
}

/// One raw check result from a single poll of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HealthRecord {
    pub node: String,
    /// Empty for node-level checks.
    pub service_id: String,
    pub service_name: String,
    pub check_id: String,
    pub name: String,
    pub status: Status,
    pub notes: String,
    pub output: String,
}

impl HealthRecord {
    pub fn new(
        node: impl Into<String>,
        service_id: impl Into<String>,
        check_id: impl Into<String>,
        status: Status,
    ) -> Self {
        Self {
            node: node.into(),
            service_id: service_id.into(),
            check_id: check_id.into(),
            status,
            ..Default::default()
        }
    }

    pub fn with_service_name(mut self, name: impl Into<String>) -> Self {
        self.service_name = name.into();
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = output.into();
        self
    }

    /// Returns `None` for node-level checks.
    pub fn service_key(&self) -> Option<ServiceKey> {
        if self.service_id.is_empty() {
            None
        } else {
            Some(ServiceKey::new(self.node.clone(), self.service_id.clone()))
        }
    }

    /// Display name of the service, falling back to its id.
    pub fn display_name(&self) -> &str {
        if self.service_name.is_empty() {
            &self.service_id
        } else {
            &self.service_name
        }
    }
}

/// Worst-case status per service, as last told downstream.
///
/// Serializes as a nested map `{node: {service_id: status}}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "NestedState", into = "NestedState")]
pub struct AggregatedState {
    statuses: BTreeMap<ServiceKey, Status>,
}

type NestedState = BTreeMap<String, BTreeMap<String, Status>>;

impl From<NestedState> for AggregatedState {
    fn from(nested: NestedState) -> Self {
        let statuses = nested
            .into_iter()
            .flat_map(|(node, services)| {
                services
                    .into_iter()
                    .map(move |(service_id, status)| (ServiceKey::new(node.clone(), service_id), status))
            })
            .collect();
        Self { statuses }
    }
}

impl From<AggregatedState> for NestedState {
    fn from(state: AggregatedState) -> Self {
        let mut nested = NestedState::new();
        for (key, status) in state.statuses {
            nested.entry(key.node).or_default().insert(key.service_id, status);
        }
        nested
    }
}

impl AggregatedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: ServiceKey, status: Status) -> Option<Status> {
        self.statuses.insert(key, status)
    }

    pub fn get(&self, key: &ServiceKey) -> Option<Status> {
        self.statuses.get(key).copied()
    }

    pub fn contains(&self, key: &ServiceKey) -> bool {
        self.statuses.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ServiceKey, Status)> {
        self.statuses.iter().map(|(k, s)| (k, *s))
    }

    /// Serialize for the state store.
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            VigilError::serialization(format!("Failed to serialize aggregated state: {}", e))
        })
    }

    /// Deserialize a snapshot written by [`AggregatedState::to_bytes`].
    pub fn from_bytes(data: &[u8]) -> crate::Result<Self> {
        serde_json::from_slice(data).map_err(|e| {
            VigilError::serialization(format!("Failed to deserialize aggregated state: {}", e))
        })
    }
}

impl FromIterator<(ServiceKey, Status)> for AggregatedState {
    fn from_iter<I: IntoIterator<Item = (ServiceKey, Status)>>(iter: I) -> Self {
        Self {
            statuses: iter.into_iter().collect(),
        }
    }
}

/// Blocking-query cursor returned by the registry.
///
/// Owned by the watch loop and never persisted; a restarted process always
/// starts from zero and re-derives changes from the persisted state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct WaitIndex(pub u64);

impl WaitIndex {
    pub const ZERO: WaitIndex = WaitIndex(0);

    pub fn new(index: u64) -> Self {
        Self(index)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    /// Next cursor after a successful response reporting `reported`.
    ///
    /// A reported index below 1 is taken as 1: a zero cursor never blocks,
    /// and a registry that keeps answering 0 would otherwise be polled in a
    /// tight loop. An index that went backwards means the registry's state
    /// was reset, so the cursor restarts from zero for one request.
    pub fn advance(self, reported: WaitIndex) -> WaitIndex {
        let reported = reported.max(WaitIndex(1));
        if reported < self {
            WaitIndex::ZERO
        } else {
            reported
        }
    }
}

impl fmt::Display for WaitIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A detected status transition for one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub key: ServiceKey,
    /// `None` when the service was not in the previous snapshot.
    pub old_status: Option<Status>,
    pub new_status: Status,
    /// The worst check behind `new_status`.
    pub record: HealthRecord,
}

/// Event emitted to the consumer, once per transition per poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    StatusChanged(StatusChange),
    /// Only emitted with [`RemovalPolicy::Report`](crate::RemovalPolicy::Report).
    Deregistered { key: ServiceKey, last_status: Status },
}

impl ChangeEvent {
    pub fn key(&self) -> &ServiceKey {
        match self {
            ChangeEvent::StatusChanged(change) => &change.key,
            ChangeEvent::Deregistered { key, .. } => key,
        }
    }

    /// Status after the transition; `None` for a deregistration.
    pub fn new_status(&self) -> Option<Status> {
        match self {
            ChangeEvent::StatusChanged(change) => Some(change.new_status),
            ChangeEvent::Deregistered { .. } => None,
        }
    }
}
