//! Health aggregation and change detection.
//!
//! Both functions here are pure: the same input always yields the same
//! output, regardless of the order the registry returned checks in.

use std::collections::btree_map::{self, BTreeMap};

use crate::{AggregatedState, ChangeEvent, HealthRecord, ServiceKey, Status, StatusChange};

/// Check id prefix of a service's maintenance-mode marker.
pub const SERVICE_MAINTENANCE_PREFIX: &str = "_service_maintenance";

/// Check id prefix of a node's maintenance-mode marker. The marker is a
/// node-level check and puts every service on the node in maintenance.
pub const NODE_MAINTENANCE_PREFIX: &str = "_node_maintenance";

/// Check id prefixes the registry uses for maintenance-mode markers.
pub const MAINTENANCE_CHECK_PREFIXES: [&str; 2] =
    [SERVICE_MAINTENANCE_PREFIX, NODE_MAINTENANCE_PREFIX];

pub fn is_maintenance_check(check_id: &str) -> bool {
    MAINTENANCE_CHECK_PREFIXES
        .iter()
        .any(|prefix| check_id.starts_with(prefix))
}

/// Status a record contributes to its service after the maintenance override.
pub fn effective_status(record: &HealthRecord) -> Status {
    if is_maintenance_check(&record.check_id) {
        Status::Maintenance
    } else {
        record.status
    }
}

/// What to do with services that vanish from a poll result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RemovalPolicy {
    /// Silently forget them; a later re-registration reports as new.
    #[default]
    Ignore,
    /// Emit [`ChangeEvent::Deregistered`].
    Report,
}

/// Aggregated health of one service: its worst status and the check behind it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHealth {
    pub status: Status,
    pub record: HealthRecord,
}

/// Result of [`aggregate`], keyed and iterated in `ServiceKey` order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Aggregate {
    services: BTreeMap<ServiceKey, ServiceHealth>,
}

impl Aggregate {
    pub fn get(&self, key: &ServiceKey) -> Option<&ServiceHealth> {
        self.services.get(key)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn iter(&self) -> btree_map::Iter<'_, ServiceKey, ServiceHealth> {
        self.services.iter()
    }

    /// Status-only projection, the form that gets persisted.
    pub fn state(&self) -> AggregatedState {
        self.services
            .iter()
            .map(|(key, health)| (key.clone(), health.status))
            .collect()
    }
}

/// Whether `record` at `status` replaces `current` as the representative.
fn is_worse(status: Status, record: &HealthRecord, current: &ServiceHealth) -> bool {
    status > current.status
        || (status == current.status && record.check_id < current.record.check_id)
}

/// Collapses raw checks into one worst-case status per `(node, service_id)`.
///
/// Node-level checks (empty service id) are dropped, except a node
/// maintenance marker, which counts against every service on its node.
/// Maintenance markers count as [`Status::Maintenance`] whatever the
/// registry reported. On equal severity the check with the smaller
/// `check_id` is kept as the representative record.
pub fn aggregate<'a, I>(records: I) -> Aggregate
where
    I: IntoIterator<Item = &'a HealthRecord>,
{
    let mut services: BTreeMap<ServiceKey, ServiceHealth> = BTreeMap::new();
    let mut node_markers: BTreeMap<&'a str, &'a HealthRecord> = BTreeMap::new();

    for record in records {
        let Some(key) = record.service_key() else {
            if record.check_id.starts_with(NODE_MAINTENANCE_PREFIX) {
                let marker = node_markers.entry(record.node.as_str()).or_insert(record);
                if record.check_id < marker.check_id {
                    *marker = record;
                }
            }
            continue;
        };
        let status = effective_status(record);

        match services.entry(key) {
            btree_map::Entry::Vacant(slot) => {
                slot.insert(ServiceHealth {
                    status,
                    record: record.clone(),
                });
            }
            btree_map::Entry::Occupied(mut slot) => {
                if is_worse(status, record, slot.get()) {
                    slot.insert(ServiceHealth {
                        status,
                        record: record.clone(),
                    });
                }
            }
        }
    }

    for (key, health) in services.iter_mut() {
        let Some(marker) = node_markers.get(key.node.as_str()) else {
            continue;
        };
        if is_worse(Status::Maintenance, marker, health) {
            // Attributed to the service so notifications can name it
            let mut record = (*marker).clone();
            record.service_id = health.record.service_id.clone();
            record.service_name = health.record.service_name.clone();
            *health = ServiceHealth {
                status: Status::Maintenance,
                record,
            };
        }
    }

    Aggregate { services }
}

/// Transitions between the last persisted state and a fresh aggregate.
///
/// Emits only when a service's status differs from, or is missing in,
/// `previous`. Events come out in `ServiceKey` order; deregistrations (when
/// reported) follow the status changes.
pub fn diff(previous: &AggregatedState, next: &Aggregate, removals: RemovalPolicy) -> Vec<ChangeEvent> {
    let mut events = Vec::new();

    for (key, health) in next.iter() {
        let old_status = previous.get(key);
        if old_status == Some(health.status) {
            continue;
        }
        events.push(ChangeEvent::StatusChanged(StatusChange {
            key: key.clone(),
            old_status,
            new_status: health.status,
            record: health.record.clone(),
        }));
    }

    if removals == RemovalPolicy::Report {
        for (key, last_status) in previous.iter() {
            if next.get(key).is_none() {
                events.push(ChangeEvent::Deregistered {
                    key: key.clone(),
                    last_status,
                });
            }
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn check(node: &str, service: &str, check_id: &str, status: Status) -> HealthRecord {
        HealthRecord::new(node, service, check_id, status)
    }

    #[test]
    fn test_worst_status_wins() {
        let records = vec![
            check("n1", "s1", "a", Status::Passing),
            check("n1", "s1", "b", Status::Critical),
            check("n1", "s1", "c", Status::Warning),
        ];
        let agg = aggregate(&records);
        assert_eq!(agg.len(), 1);

        let health = agg.get(&ServiceKey::new("n1", "s1")).unwrap();
        assert_eq!(health.status, Status::Critical);
        assert_eq!(health.record.check_id, "b");
    }

    #[test]
    fn test_node_level_checks_dropped() {
        let records = vec![
            check("n1", "", "serfHealth", Status::Critical),
            check("n1", "s1", "http", Status::Passing),
        ];
        let state = aggregate(&records).state();
        assert_eq!(state.len(), 1);
        assert_eq!(state.get(&ServiceKey::new("n1", "s1")), Some(Status::Passing));
    }

    #[test]
    fn test_maintenance_overrides_everything() {
        let records = vec![
            check("n1", "s1", "http", Status::Critical),
            check("n1", "s1", "_service_maintenance:s1", Status::Critical),
            check("n1", "s1", "tcp", Status::Passing),
        ];
        let health = aggregate(&records);
        let health = health.get(&ServiceKey::new("n1", "s1")).unwrap();
        assert_eq!(health.status, Status::Maintenance);
        assert!(is_maintenance_check(&health.record.check_id));
    }

    #[test]
    fn test_node_maintenance_covers_every_service_on_the_node() {
        let records = vec![
            check("n1", "web", "http", Status::Passing),
            check("n1", "db", "tcp", Status::Critical),
            check("n1", "", "_node_maintenance", Status::Critical),
            check("n2", "web", "http", Status::Passing),
        ];
        let agg = aggregate(&records);
        assert_eq!(agg.len(), 3);

        for service in ["web", "db"] {
            let health = agg.get(&ServiceKey::new("n1", service)).unwrap();
            assert_eq!(health.status, Status::Maintenance);
            assert_eq!(health.record.check_id, "_node_maintenance");
            assert_eq!(health.record.service_id, service);
        }
        let other = agg.get(&ServiceKey::new("n2", "web")).unwrap();
        assert_eq!(other.status, Status::Passing);
    }

    #[test]
    fn test_node_maintenance_alone_reports_nothing() {
        let records = vec![check("n1", "", "_node_maintenance", Status::Critical)];
        assert!(aggregate(&records).is_empty());
    }

    #[test]
    fn test_services_grouped_per_node() {
        let records = vec![
            check("n1", "web", "http", Status::Passing),
            check("n2", "web", "http", Status::Warning),
        ];
        let state = aggregate(&records).state();
        assert_eq!(state.get(&ServiceKey::new("n1", "web")), Some(Status::Passing));
        assert_eq!(state.get(&ServiceKey::new("n2", "web")), Some(Status::Warning));
    }

    #[test]
    fn test_diff_emits_only_on_change() {
        let key = ServiceKey::new("n1", "s1");
        let previous: AggregatedState = [(key.clone(), Status::Passing)].into_iter().collect();

        let same = aggregate(&[check("n1", "s1", "http", Status::Passing)]);
        assert!(diff(&previous, &same, RemovalPolicy::Ignore).is_empty());

        let worse = aggregate(&[check("n1", "s1", "http", Status::Critical)]);
        let events = diff(&previous, &worse, RemovalPolicy::Ignore);
        assert_eq!(events.len(), 1);
        match &events[0] {
            ChangeEvent::StatusChanged(change) => {
                assert_eq!(change.key, key);
                assert_eq!(change.old_status, Some(Status::Passing));
                assert_eq!(change.new_status, Status::Critical);
                assert_eq!(change.record.check_id, "http");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_diff_reports_unseen_services() {
        let next = aggregate(&[check("n1", "s1", "http", Status::Critical)]);
        let events = diff(&AggregatedState::new(), &next, RemovalPolicy::Ignore);
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            ChangeEvent::StatusChanged(StatusChange { old_status: None, new_status: Status::Critical, .. })
        ));
    }

    #[test]
    fn test_diff_removal_policy() {
        let gone = ServiceKey::new("n1", "old");
        let previous: AggregatedState = [(gone.clone(), Status::Warning)].into_iter().collect();
        let next = Aggregate::default();

        assert!(diff(&previous, &next, RemovalPolicy::Ignore).is_empty());

        let events = diff(&previous, &next, RemovalPolicy::Report);
        assert_eq!(
            events,
            vec![ChangeEvent::Deregistered {
                key: gone,
                last_status: Status::Warning
            }]
        );
    }

    fn arb_status() -> impl Strategy<Value = Status> {
        prop_oneof![
            Just(Status::Passing),
            Just(Status::Warning),
            Just(Status::Critical),
            Just(Status::Maintenance),
        ]
    }

    fn arb_record() -> impl Strategy<Value = HealthRecord> {
        (
            prop::sample::select(vec!["n1", "n2", "n:3"]),
            prop::sample::select(vec!["", "web", "db", "a:b"]),
            prop::sample::select(vec!["http", "tcp", "script", "_service_maintenance:x", "_node_maintenance"]),
            arb_status(),
        )
            .prop_map(|(node, service, check_id, status)| check(node, service, check_id, status))
    }

    proptest! {
        #[test]
        fn prop_aggregate_is_order_independent(
            (records, shuffled) in prop::collection::vec(arb_record(), 0..24)
                .prop_flat_map(|records| {
                    let shuffled = Just(records.clone()).prop_shuffle();
                    (Just(records), shuffled)
                })
        ) {
            prop_assert_eq!(aggregate(&records), aggregate(&shuffled));
        }

        #[test]
        fn prop_status_is_maximum_of_group(records in prop::collection::vec(arb_record(), 1..24)) {
            let agg = aggregate(&records);
            for (key, health) in agg.iter() {
                let own = records
                    .iter()
                    .filter(|r| r.service_key().as_ref() == Some(key))
                    .map(effective_status)
                    .max()
                    .unwrap();
                let node_in_maintenance = records.iter().any(|r| {
                    r.service_id.is_empty()
                        && r.node == key.node
                        && r.check_id.starts_with(NODE_MAINTENANCE_PREFIX)
                });
                let expected = if node_in_maintenance { Status::Maintenance } else { own };
                prop_assert_eq!(health.status, expected);
            }
        }

        #[test]
        fn prop_diff_against_self_is_empty(records in prop::collection::vec(arb_record(), 0..24)) {
            let agg = aggregate(&records);
            prop_assert!(diff(&agg.state(), &agg, RemovalPolicy::Report).is_empty());
        }
    }
}
