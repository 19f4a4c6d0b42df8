//! Autoscaler-facing admission service
//!
//! Answers the external scaler protocol (IsActive, GetMetricSpec,
//! GetMetrics) from the latest published snapshot and notifies a listener
//! when admission flips, so the rebalancer can be started or workloads
//! torn down.

mod grpc;
mod overload;
mod service;

pub use grpc::ScalerGrpc;
pub use overload::OverloadMonitor;
pub use service::{admissible_nodes, spare_capacity, ScalerService};

use async_trait::async_trait;

/// Reacts to admission transitions
#[async_trait]
pub trait AdmissionListener: Send + Sync {
    /// At least one node regained capacity
    async fn activated(&self);

    /// No node has capacity left
    async fn deactivated(&self);

    /// Whether an earlier deactivation left work behind. Clears the flag,
    /// so at most one retry is queued per incomplete teardown.
    fn take_teardown_pending(&self) -> bool {
        false
    }
}
