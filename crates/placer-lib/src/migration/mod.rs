//! Migration control
//!
//! Applies placement decisions through the orchestrator seam with
//! strict per-group ordering, the keep-one occupancy guard and
//! read-before-write affinity patches. Also home to the bulk teardown,
//! the persisted last stable node and the rebalancing loop.

mod controller;
mod r#loop;
mod stable;
mod teardown;

#[cfg(test)]
mod tests;

pub use controller::{ensure_affinity, CycleOutcome, MigrationController, MigrationError};
pub use r#loop::{RebalanceLoop, RebalanceSupervisor, RebalanceSupervisorBuilder};
pub use stable::LastStableStore;
pub use teardown::{teardown, TeardownReport};
