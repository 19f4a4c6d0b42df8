//! Rebalancing loop and its supervisor
//!
//! The loop averages utilization over a sampling window, then runs one
//! decision cycle. The supervisor starts and stops the loop when the
//! autoscaler's admission state changes, and tears workloads down when
//! no node has capacity left.

use super::{teardown, CycleOutcome, MigrationController, TeardownReport};
use crate::health::{components, HealthRegistry};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::scaler::AdmissionListener;
use crate::telemetry::{TelemetryClient, WindowSpec};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Periodic rebalancing over windowed-average snapshots
pub struct RebalanceLoop {
    controller: Arc<MigrationController>,
    client: TelemetryClient,
    window: WindowSpec,
    interval: Duration,
    health: Option<HealthRegistry>,
}

impl RebalanceLoop {
    pub fn new(
        controller: Arc<MigrationController>,
        client: TelemetryClient,
        window: WindowSpec,
        interval: Duration,
    ) -> Self {
        Self {
            controller,
            client,
            window,
            interval,
            health: None,
        }
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    /// Run until `shutdown` fires. A cycle that has started is finished
    /// before the loop exits.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.interval.as_secs(),
            window_samples = self.window.samples,
            "Starting rebalancing loop"
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => break,
                _ = ticker.tick() => {}
            }

            let snapshot = match self.client.sample_window(self.window, &mut shutdown).await {
                Some(snapshot) => snapshot,
                None => break,
            };

            if snapshot.is_empty() {
                warn!("No node produced a sample during the window, skipping cycle");
                self.report(Err("empty sampling window".to_string())).await;
                continue;
            }

            let outcome = self.controller.run_cycle(&snapshot).await;
            let result = match &outcome {
                CycleOutcome::Skipped(reason) => Err(reason.clone()),
                CycleOutcome::Migrated { failed, .. } if !failed.is_empty() => Err(format!(
                    "{} migration(s) aborted",
                    failed.len()
                )),
                _ => Ok(()),
            };
            debug!(outcome = ?outcome, "Rebalancing cycle complete");
            self.report(result).await;
        }

        info!("Shutting down rebalancing loop");
    }

    async fn report(&self, result: Result<(), String>) {
        if let Some(health) = &self.health {
            match result {
                Ok(()) => health.record_success(components::REBALANCER).await,
                Err(message) => health.record_failure(components::REBALANCER, message).await,
            }
        }
    }
}

struct Running {
    stop: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Starts, stops and tears down on admission changes
pub struct RebalanceSupervisor {
    controller: Arc<MigrationController>,
    client: TelemetryClient,
    groups: Vec<String>,
    window: WindowSpec,
    interval: Duration,
    health: Option<HealthRegistry>,
    metrics: Option<ControllerMetrics>,
    logger: StructuredLogger,
    running: Mutex<Option<Running>>,
    /// Serializes admission transitions
    transition: Mutex<()>,
    /// Set while the last teardown left groups behind
    teardown_pending: AtomicBool,
}

impl RebalanceSupervisor {
    pub fn builder(
        controller: Arc<MigrationController>,
        client: TelemetryClient,
        groups: Vec<String>,
    ) -> RebalanceSupervisorBuilder {
        RebalanceSupervisorBuilder {
            controller,
            client,
            groups,
            window: WindowSpec::new(6, Duration::from_secs(5)),
            interval: Duration::from_secs(30),
            health: None,
            metrics: None,
        }
    }

    /// Start the loop; false if it was already running
    pub async fn start(&self) -> bool {
        let mut running = self.running.lock().await;
        if let Some(r) = running.as_ref() {
            if !r.handle.is_finished() {
                return false;
            }
        }

        let (stop, rx) = broadcast::channel(1);
        let mut rebalance = RebalanceLoop::new(
            Arc::clone(&self.controller),
            self.client.clone(),
            self.window,
            self.interval,
        );
        if let Some(health) = &self.health {
            rebalance = rebalance.with_health(health.clone());
        }

        let handle = tokio::spawn(rebalance.run(rx));
        *running = Some(Running { stop, handle });
        true
    }

    /// Stop the loop and wait for an in-flight cycle; false if not running
    pub async fn stop(&self) -> bool {
        let Some(running) = self.running.lock().await.take() else {
            return false;
        };
        let _ = running.stop.send(());
        if let Err(e) = running.handle.await {
            warn!(error = %e, "Rebalancing loop ended abnormally");
        }
        true
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| !r.handle.is_finished())
            .unwrap_or(false)
    }

    /// Stop rebalancing, then delete all jobs and leftover pods
    pub async fn teardown(&self) -> TeardownReport {
        self.stop().await;
        let report = teardown(self.controller.orchestrator().as_ref(), &self.groups).await;
        self.logger
            .log_teardown(self.groups.len(), report.jobs_deleted, report.pods_deleted);
        if let Some(metrics) = &self.metrics {
            metrics.inc_teardowns();
        }
        self.teardown_pending
            .store(!report.is_complete(), Ordering::SeqCst);
        if let Some(health) = &self.health {
            if report.is_complete() {
                health.record_success(components::ORCHESTRATOR).await;
            } else {
                health
                    .record_failure(
                        components::ORCHESTRATOR,
                        format!("teardown failed for {:?}", report.failed_groups),
                    )
                    .await;
            }
        }
        report
    }
}

#[async_trait]
impl AdmissionListener for RebalanceSupervisor {
    async fn activated(&self) {
        let _guard = self.transition.lock().await;
        self.teardown_pending.store(false, Ordering::SeqCst);
        if self.start().await {
            info!("Rebalancing started on capacity gain");
        }
    }

    async fn deactivated(&self) {
        let _guard = self.transition.lock().await;
        self.teardown().await;
    }

    fn take_teardown_pending(&self) -> bool {
        self.teardown_pending.swap(false, Ordering::SeqCst)
    }
}

pub struct RebalanceSupervisorBuilder {
    controller: Arc<MigrationController>,
    client: TelemetryClient,
    groups: Vec<String>,
    window: WindowSpec,
    interval: Duration,
    health: Option<HealthRegistry>,
    metrics: Option<ControllerMetrics>,
}

impl RebalanceSupervisorBuilder {
    pub fn window(mut self, window: WindowSpec) -> Self {
        self.window = window;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn metrics(mut self, metrics: ControllerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> RebalanceSupervisor {
        RebalanceSupervisor {
            controller: self.controller,
            client: self.client,
            groups: self.groups,
            window: self.window,
            interval: self.interval,
            health: self.health,
            metrics: self.metrics,
            logger: StructuredLogger::new("rebalancer"),
            running: Mutex::new(None),
            transition: Mutex::new(()),
            teardown_pending: AtomicBool::new(false),
        }
    }
}
