//! Long-window overload check
//!
//! Averages each node over a long range window and feeds the result into
//! the same admission evaluation that IsActive uses, so sustained
//! saturation triggers teardown even when the autoscaler is quiet.

use super::ScalerService;
use crate::observability::StructuredLogger;
use crate::policy::classify;
use crate::telemetry::TelemetryClient;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::{interval_at, Instant};
use tracing::info;

/// Resolution of the range query
const RANGE_STEP: Duration = Duration::from_secs(60);

pub struct OverloadMonitor {
    client: TelemetryClient,
    service: Arc<ScalerService>,
    threshold: f64,
    window: Duration,
    interval: Duration,
    logger: StructuredLogger,
}

impl OverloadMonitor {
    pub fn new(
        client: TelemetryClient,
        service: Arc<ScalerService>,
        threshold: f64,
        window: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            service,
            threshold,
            window,
            interval,
            logger: StructuredLogger::new("overload"),
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            window_secs = self.window.as_secs(),
            "Starting overload monitor"
        );

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.check().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down overload monitor");
                    break;
                }
            }
        }
    }

    /// One long-window evaluation; returns the admission result
    pub async fn check(&self) -> bool {
        let step = RANGE_STEP.min(self.window);
        let snapshot = self.client.sample_range(self.window, step).await;
        let overloaded = classify(&snapshot, self.threshold).overloaded_names();
        self.logger
            .log_overloaded(&overloaded, self.window.as_secs());
        self.service.evaluate(&snapshot)
    }
}
