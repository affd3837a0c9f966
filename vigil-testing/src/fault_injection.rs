use std::collections::{HashMap, VecDeque};

use vigil_core::VigilError;

/// Registry calls that faults can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    CreateSession,
    RenewSession,
    DestroySession,
    KvGet,
    KvPut,
    KvAcquire,
    KvRelease,
    HealthState,
}

impl Operation {
    pub const ALL: [Operation; 8] = [
        Operation::CreateSession,
        Operation::RenewSession,
        Operation::DestroySession,
        Operation::KvGet,
        Operation::KvPut,
        Operation::KvAcquire,
        Operation::KvRelease,
        Operation::HealthState,
    ];
}

/// Pending faults and call accounting for a simulated registry.
#[derive(Debug, Default)]
pub struct FaultPlan {
    /// Every call fails with a connectivity error while set.
    offline: bool,
    /// One-shot errors consumed in order, per operation.
    queued: HashMap<Operation, VecDeque<VigilError>>,
    calls: HashMap<Operation, u64>,
}

impl FaultPlan {
    pub fn set_offline(&mut self, offline: bool) {
        self.offline = offline;
    }

    pub fn inject(&mut self, operation: Operation, error: VigilError) {
        self.queued.entry(operation).or_default().push_back(error);
    }

    pub fn clear(&mut self) {
        self.offline = false;
        self.queued.clear();
    }

    pub fn calls(&self, operation: Operation) -> u64 {
        self.calls.get(&operation).copied().unwrap_or(0)
    }

    /// Records the call and returns the fault it should fail with, if any.
    pub fn on_call(&mut self, operation: Operation) -> Option<VigilError> {
        *self.calls.entry(operation).or_default() += 1;

        if self.offline {
            return Some(VigilError::connectivity("registry unreachable (simulated)"));
        }
        self.queued
            .get_mut(&operation)
            .and_then(|queue| queue.pop_front())
    }
}
