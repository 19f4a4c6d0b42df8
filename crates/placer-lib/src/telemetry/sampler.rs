//! Per-node utilization sampling
//!
//! Every node is queried independently with its own timeout; one slow or
//! failing node never affects the others. There is no retry within a pass:
//! the next scheduled pass is the retry.

use super::MetricsBackend;
use crate::models::{NodeTarget, NodeTelemetry, UtilizationSnapshot};
use anyhow::Result;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Shape of a windowed-average sampling pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSpec {
    /// Number of instant samples
    pub samples: usize,
    /// Pause between samples
    pub every: Duration,
}

impl WindowSpec {
    pub fn new(samples: usize, every: Duration) -> Self {
        Self {
            samples: samples.max(1),
            every,
        }
    }
}

/// Queries the metrics backend for per-node utilization
#[derive(Clone)]
pub struct TelemetryClient {
    backend: Arc<dyn MetricsBackend>,
    nodes: Arc<Vec<NodeTarget>>,
    timeout: Duration,
}

impl TelemetryClient {
    pub fn new(backend: Arc<dyn MetricsBackend>, nodes: Vec<NodeTarget>, timeout: Duration) -> Self {
        Self {
            backend,
            nodes: Arc::new(nodes),
            timeout,
        }
    }

    pub fn nodes(&self) -> &[NodeTarget] {
        &self.nodes
    }

    /// Take one instant reading of every node.
    ///
    /// Nodes whose query fails, times out or returns no series are absent.
    pub async fn sample_instant(&self) -> Vec<NodeTelemetry> {
        let mut set = JoinSet::new();

        for target in self.nodes.iter().cloned() {
            let backend = Arc::clone(&self.backend);
            let timeout = self.timeout;
            set.spawn(async move {
                let result = query_node(backend.as_ref(), &target, timeout).await;
                (target, result)
            });
        }

        let mut readings = Vec::with_capacity(self.nodes.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((target, Ok(Some(value)))) => readings.push(NodeTelemetry {
                    node: target.name.clone(),
                    metric: target.metric.clone(),
                    instance: target.instance.clone(),
                    value,
                    sampled_at: Utc::now(),
                }),
                Ok((target, Ok(None))) => {
                    debug!(node = %target.name, "No series returned for node");
                }
                Ok((target, Err(e))) => {
                    warn!(node = %target.name, error = %e, "Utilization query failed");
                }
                Err(e) => {
                    warn!(error = %e, "Utilization query task failed");
                }
            }
        }

        readings.sort_by(|a, b| a.node.cmp(&b.node));
        readings
    }

    /// Instant readings as a snapshot
    pub async fn snapshot_instant(&self) -> UtilizationSnapshot {
        self.sample_instant()
            .await
            .into_iter()
            .map(|r| (r.node, r.value))
            .collect()
    }

    /// Average `window.samples` instant readings taken `window.every` apart.
    ///
    /// Only successful samples are averaged; a node with none is absent.
    /// Returns `None` when `shutdown` fires before the window completes.
    pub async fn sample_window(
        &self,
        window: WindowSpec,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Option<UtilizationSnapshot> {
        let mut acc: BTreeMap<String, Vec<f64>> = BTreeMap::new();

        for i in 0..window.samples {
            for reading in self.sample_instant().await {
                acc.entry(reading.node).or_default().push(reading.value);
            }

            if i + 1 < window.samples {
                tokio::select! {
                    _ = tokio::time::sleep(window.every) => {}
                    _ = shutdown.recv() => return None,
                }
            }
        }

        Some(average(acc))
    }

    /// Average of each node's series over the last `window`, via range queries
    pub async fn sample_range(&self, window: Duration, step: Duration) -> UtilizationSnapshot {
        let end = Utc::now();
        let start = end
            - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::minutes(15));

        let mut set = JoinSet::new();
        for target in self.nodes.iter().cloned() {
            let backend = Arc::clone(&self.backend);
            let timeout = self.timeout;
            set.spawn(async move {
                let expr = target.query_expression();
                let result =
                    tokio::time::timeout(timeout, backend.query_range(&expr, start, end, step))
                        .await;
                (target, result)
            });
        }

        let mut acc: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((target, Ok(Ok(samples)))) => {
                    let values = acc.entry(target.name.clone()).or_default();
                    values.extend(
                        samples
                            .iter()
                            .map(|s| target.scale.to_percent(s.value).clamp(0.0, 100.0)),
                    );
                }
                Ok((target, Ok(Err(e)))) => {
                    warn!(node = %target.name, error = %e, "Range query failed");
                }
                Ok((target, Err(_))) => {
                    warn!(node = %target.name, "Range query timed out");
                }
                Err(e) => warn!(error = %e, "Range query task failed"),
            }
        }

        average(acc)
    }
}

/// Query one node; `Ok(None)` when the backend has no series for it
async fn query_node(
    backend: &dyn MetricsBackend,
    target: &NodeTarget,
    timeout: Duration,
) -> Result<Option<f64>> {
    let expr = target.query_expression();
    let samples = tokio::time::timeout(timeout, backend.query_instant(&expr))
        .await
        .map_err(|_| anyhow::anyhow!("query timed out after {:?}", timeout))??;

    Ok(samples
        .first()
        .map(|s| target.scale.to_percent(s.value).clamp(0.0, 100.0)))
}

/// Arithmetic mean per node; nodes without values are dropped
fn average(acc: BTreeMap<String, Vec<f64>>) -> UtilizationSnapshot {
    acc.into_iter()
        .filter(|(_, values)| !values.is_empty())
        .map(|(node, values)| {
            let mean = values.iter().sum::<f64>() / values.len() as f64;
            (node, mean)
        })
        .collect()
}
