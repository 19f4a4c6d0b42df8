//! Migration execution
//!
//! One migration moves one instance of one group. Steps run strictly in
//! order: delete the instance's job, delete that job's leftover pods,
//! then pin the group's template to the destination. Every step is
//! idempotent, so a cycle that aborts halfway is simply redone from
//! fresh live placement on the next cycle.

use super::LastStableStore;
use crate::health::{components, HealthRegistry};
use crate::models::{
    IntentPhase, Placement, PlacementIntent, UtilizationSnapshot, Workload, WorkloadPhase,
};
use crate::observability::{ControllerMetrics, StructuredLogger};
use crate::orchestrator::{DeleteTarget, NodeAffinity, Orchestrator, OrchestratorError};
use crate::policy::{Decision, NoActionReason, PlacementPolicy};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("group {group} has {count} instance(s) on {node}; at least 2 are required to move one")]
    OccupancyFloor {
        group: String,
        node: String,
        count: usize,
    },
    #[error("no active instance of group {group} with a job on {node}")]
    NoInstance { group: String, node: String },
    #[error("migration of group {group} aborted after {phase}: {source}")]
    Step {
        group: String,
        phase: IntentPhase,
        #[source]
        source: OrchestratorError,
    },
}

impl MigrationError {
    /// Short label for metrics
    pub fn reason(&self) -> &'static str {
        match self {
            MigrationError::OccupancyFloor { .. } => "occupancy_floor",
            MigrationError::NoInstance { .. } => "no_instance",
            MigrationError::Step { .. } => "orchestrator",
        }
    }
}

/// Result of one rebalancing cycle
#[derive(Debug)]
pub enum CycleOutcome {
    /// Live placement could not be read
    Skipped(String),
    NoAction(NoActionReason),
    Migrated {
        completed: Vec<PlacementIntent>,
        failed: Vec<(PlacementIntent, MigrationError)>,
    },
}

/// Pin `group` to `node` unless its template already points there.
///
/// Returns whether a patch was written.
pub async fn ensure_affinity(
    orchestrator: &dyn Orchestrator,
    group: &str,
    key: &str,
    node: &str,
) -> Result<bool, OrchestratorError> {
    if let Some(current) = orchestrator.read_affinity(group).await? {
        if current.pins(key, node) {
            return Ok(false);
        }
    }
    orchestrator
        .patch_affinity(group, &NodeAffinity::pin(key, node))
        .await?;
    Ok(true)
}

/// Applies placement decisions to the orchestrator
pub struct MigrationController {
    orchestrator: Arc<dyn Orchestrator>,
    policy: PlacementPolicy,
    affinity_key: String,
    stable: LastStableStore,
    rng: Mutex<StdRng>,
    metrics: Option<ControllerMetrics>,
    health: Option<HealthRegistry>,
    logger: StructuredLogger,
}

impl MigrationController {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        policy: PlacementPolicy,
        affinity_key: impl Into<String>,
        stable: LastStableStore,
    ) -> Self {
        Self {
            orchestrator,
            policy,
            affinity_key: affinity_key.into(),
            stable,
            rng: Mutex::new(StdRng::from_entropy()),
            metrics: None,
            health: None,
            logger: StructuredLogger::new("rebalancer"),
        }
    }

    /// Use a fixed random source for destination tie-breaks
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn with_metrics(mut self, metrics: ControllerMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn orchestrator(&self) -> &Arc<dyn Orchestrator> {
        &self.orchestrator
    }

    pub fn last_stable(&self) -> &LastStableStore {
        &self.stable
    }

    /// Decide and apply this cycle's migrations from one snapshot
    pub async fn run_cycle(&self, snapshot: &UtilizationSnapshot) -> CycleOutcome {
        let class = self.policy.classify(snapshot);
        self.logger
            .log_classification(&class.underloaded_names(), &class.overloaded_names());

        let placement = match self.orchestrator.list_instances().await {
            Ok(placement) => placement,
            Err(e) => {
                warn!(error = %e, "Failed to read live placement");
                self.orchestrator_failed(&e).await;
                return CycleOutcome::Skipped(e.to_string());
            }
        };

        let last_stable = self.stable.get();
        let decision = {
            let mut rng = self.rng.lock().unwrap_or_else(|p| p.into_inner());
            self.policy
                .decide(snapshot, &placement, last_stable.as_deref(), &mut *rng)
        };

        match decision {
            Decision::NoAction(reason) => {
                match &reason {
                    NoActionReason::NoOverloaded => self.set_stable(None),
                    NoActionReason::StableDestination(node) => {
                        self.logger.log_suppressed(node);
                        if let Some(metrics) = &self.metrics {
                            metrics.inc_migrations_suppressed();
                        }
                    }
                    _ => {}
                }
                self.logger.log_no_action(&reason.to_string());
                CycleOutcome::NoAction(reason)
            }
            Decision::Migrate(intents) => {
                let destination = intents.first().map(|i| i.to.clone());
                let mut completed = Vec::new();
                let mut failed = Vec::new();

                for intent in intents {
                    match self.execute(intent.clone()).await {
                        Ok(done) => completed.push(done),
                        Err(e) => failed.push((intent, e)),
                    }
                }

                if !completed.is_empty() {
                    self.set_stable(destination);
                }
                CycleOutcome::Migrated { completed, failed }
            }
        }
    }

    /// Move one instance of `intent.group` from `intent.from` to `intent.to`
    pub async fn execute(
        &self,
        mut intent: PlacementIntent,
    ) -> Result<PlacementIntent, MigrationError> {
        self.logger
            .log_migration_started(&intent.group, &intent.from, &intent.to);

        let result = self.apply(&mut intent).await;
        match &result {
            Ok(()) => {
                self.logger
                    .log_migration_completed(&intent.group, &intent.from, &intent.to);
                if let Some(metrics) = &self.metrics {
                    metrics.inc_migrations_completed();
                }
                if let Some(health) = &self.health {
                    health.record_success(components::ORCHESTRATOR).await;
                }
            }
            Err(e) => {
                self.logger.log_migration_aborted(
                    &intent.group,
                    &intent.phase.to_string(),
                    &e.to_string(),
                );
                if let Some(metrics) = &self.metrics {
                    metrics.inc_migrations_aborted(e.reason());
                }
                if let MigrationError::Step { source, .. } = e {
                    self.orchestrator_failed(source).await;
                }
            }
        }
        result.map(|()| intent)
    }

    async fn apply(&self, intent: &mut PlacementIntent) -> Result<(), MigrationError> {
        let placement = self
            .orchestrator
            .list_instances()
            .await
            .map_err(|e| step_error(intent, e))?;

        let count = placement.count(&intent.group, &intent.from);
        if count < 2 {
            return Err(MigrationError::OccupancyFloor {
                group: intent.group.clone(),
                node: intent.from.clone(),
                count,
            });
        }

        let job = resolve_job(&placement, intent).ok_or_else(|| MigrationError::NoInstance {
            group: intent.group.clone(),
            node: intent.from.clone(),
        })?;
        intent.job = Some(job.clone());

        let target = DeleteTarget::Job {
            group: intent.group.clone(),
            job,
        };

        let jobs = self
            .orchestrator
            .delete_jobs(&target)
            .await
            .map_err(|e| step_error(intent, e))?;
        intent.advance(IntentPhase::JobDeleted);
        self.logger
            .log_migration_step(&intent.group, &intent.phase.to_string(), jobs);

        let pods = self
            .orchestrator
            .delete_pods(&target)
            .await
            .map_err(|e| step_error(intent, e))?;
        intent.advance(IntentPhase::PodsCleaned);
        self.logger
            .log_migration_step(&intent.group, &intent.phase.to_string(), pods);

        let patched = ensure_affinity(
            self.orchestrator.as_ref(),
            &intent.group,
            &self.affinity_key,
            &intent.to,
        )
        .await
        .map_err(|e| step_error(intent, e))?;
        intent.advance(IntentPhase::AffinityPatched);
        self.logger.log_migration_step(
            &intent.group,
            &intent.phase.to_string(),
            usize::from(patched),
        );

        intent.advance(IntentPhase::Complete);
        Ok(())
    }

    fn set_stable(&self, node: Option<String>) {
        if let Err(e) = self.stable.set(node) {
            warn!(error = %e, "Failed to persist last stable node");
        }
    }

    async fn orchestrator_failed(&self, error: &OrchestratorError) {
        if let Some(health) = &self.health {
            health
                .record_failure(components::ORCHESTRATOR, error.to_string())
                .await;
        }
    }
}

fn step_error(intent: &PlacementIntent, source: OrchestratorError) -> MigrationError {
    MigrationError::Step {
        group: intent.group.clone(),
        phase: intent.phase,
        source,
    }
}

/// The decided job if it is still live on the source node, otherwise the
/// best remaining instance of the group there
fn resolve_job(placement: &Placement, intent: &PlacementIntent) -> Option<String> {
    let candidates: Vec<&Workload> = placement
        .on_node(&intent.from)
        .filter(|w| w.group == intent.group && w.job.is_some())
        .collect();

    candidates
        .iter()
        .find(|w| intent.job.is_some() && w.job == intent.job)
        .or_else(|| {
            candidates.iter().min_by(|a, b| {
                (a.phase != WorkloadPhase::Running)
                    .cmp(&(b.phase != WorkloadPhase::Running))
                    .then_with(|| a.name.cmp(&b.name))
            })
        })
        .and_then(|w| w.job.clone())
}
