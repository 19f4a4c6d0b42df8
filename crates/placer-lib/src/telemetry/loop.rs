//! Background sampling loop
//!
//! Takes one instant reading of every node per interval and publishes it
//! to the shared [`SnapshotStore`]. This is the only writer of the store.

use super::{SnapshotStore, TelemetryClient};
use crate::health::{components, HealthRegistry};
use crate::observability::ControllerMetrics;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Periodic utilization sampler
pub struct SamplingLoop {
    client: TelemetryClient,
    store: SnapshotStore,
    interval: Duration,
    metrics: Option<ControllerMetrics>,
    health: Option<HealthRegistry>,
}

impl SamplingLoop {
    pub fn builder(client: TelemetryClient, store: SnapshotStore) -> SamplingLoopBuilder {
        SamplingLoopBuilder::new(client, store)
    }

    /// Run until `shutdown` fires. The first pass runs immediately.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            nodes = self.client.nodes().len(),
            "Starting utilization sampling loop"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.pass().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down utilization sampling loop");
                    break;
                }
            }
        }
    }

    /// One sampling pass
    pub async fn pass(&self) {
        let start = Instant::now();
        let readings = self.client.sample_instant().await;
        let elapsed = start.elapsed();

        let configured = self.client.nodes().len();
        let sampled = readings.len();

        if let Some(metrics) = &self.metrics {
            metrics.observe_sampling(elapsed.as_secs_f64(), sampled, configured);
            for reading in &readings {
                metrics.set_node_utilization(&reading.node, reading.value);
            }
        }

        let view = self.store.publish(readings).await;
        debug!(
            pass = view.pass,
            sampled = sampled,
            configured = configured,
            elapsed_ms = elapsed.as_millis() as u64,
            "Sampling pass complete"
        );

        if let Some(health) = &self.health {
            health.mark_first_pass().await;
            if sampled == 0 {
                health
                    .record_failure(components::SAMPLER, "no node returned a sample")
                    .await;
            } else {
                health.record_success(components::SAMPLER).await;
            }
        }
    }
}

/// Builder for [`SamplingLoop`]
pub struct SamplingLoopBuilder {
    client: TelemetryClient,
    store: SnapshotStore,
    interval: Duration,
    metrics: Option<ControllerMetrics>,
    health: Option<HealthRegistry>,
}

impl SamplingLoopBuilder {
    pub fn new(client: TelemetryClient, store: SnapshotStore) -> Self {
        Self {
            client,
            store,
            interval: Duration::from_secs(15),
            metrics: None,
            health: None,
        }
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn metrics(mut self, metrics: ControllerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn build(self) -> SamplingLoop {
        SamplingLoop {
            client: self.client,
            store: self.store,
            interval: self.interval,
            metrics: self.metrics,
            health: self.health,
        }
    }
}
