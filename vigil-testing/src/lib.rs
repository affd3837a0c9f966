//! Test support for Vigil: an in-memory registry simulation with fault
//! injection, shared by the unit tests of the other crates and by the
//! integration tests under `tests/`.

pub mod fault_injection;
pub mod registry;

pub use fault_injection::{FaultPlan, Operation};
pub use registry::InMemoryRegistry;
