//! Node utilization telemetry
//!
//! This module queries a metrics backend for per-node utilization. It
//! supports instant sampling for fast admission checks, windowed averages
//! over several instant samples for rebalancing, and range-averaged
//! readings for the long-window overload check. Nodes that produce no
//! sample are left out of the result so callers can tell "idle" from
//! "unknown".

mod prometheus;
mod r#loop;
mod sampler;
mod snapshot;

#[cfg(test)]
mod tests;

pub use prometheus::PrometheusBackend;
pub use r#loop::{SamplingLoop, SamplingLoopBuilder};
pub use sampler::{TelemetryClient, WindowSpec};
pub use snapshot::{SnapshotStore, SnapshotView};

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

pub use async_trait::async_trait;

/// One series value returned by the backend
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: BTreeMap<String, String>,
    pub value: f64,
    /// Seconds since the Unix epoch
    pub timestamp: f64,
}

/// Metrics query interface consumed by the controller
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Evaluate `expression` at the current time
    async fn query_instant(&self, expression: &str) -> Result<Vec<Sample>>;

    /// Evaluate `expression` over `[start, end]` at `step` resolution
    async fn query_range(
        &self,
        expression: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: std::time::Duration,
    ) -> Result<Vec<Sample>>;
}
