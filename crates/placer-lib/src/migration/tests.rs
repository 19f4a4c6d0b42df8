//! Tests for migration control against the recording orchestrator

use super::*;
use crate::models::{
    IntentPhase, NodeTarget, PlacementIntent, UtilizationSnapshot, Workload, WorkloadPhase,
};
use crate::orchestrator::{
    Command, DeleteTarget, InMemoryOrchestrator, NodeAffinity, Operation, Orchestrator,
};
use crate::policy::{NoActionReason, PlacementPolicy};
use crate::scaler::{AdmissionListener, ScalerService};
use crate::settings::ScalerSettings;
use crate::telemetry::{
    async_trait, MetricsBackend, Sample, SnapshotStore, TelemetryClient, WindowSpec,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Duration;

fn instance(job: &str, group: &str, node: &str) -> Workload {
    Workload {
        name: format!("{}-pod", job),
        job: Some(job.to_string()),
        group: group.to_string(),
        node: Some(node.to_string()),
        phase: WorkloadPhase::Running,
    }
}

fn snapshot(values: &[(&str, f64)]) -> UtilizationSnapshot {
    values.iter().map(|(n, v)| (n.to_string(), *v)).collect()
}

fn controller(orchestrator: &Arc<InMemoryOrchestrator>, threshold: f64) -> MigrationController {
    MigrationController::new(
        orchestrator.clone(),
        PlacementPolicy::new(threshold),
        "gpu-node",
        LastStableStore::in_memory(),
    )
    .with_rng(StdRng::seed_from_u64(17))
}

/// Assert that every pod delete of a group comes after a job delete of it
fn assert_jobs_before_pods(trace: &[Command]) {
    for (i, command) in trace.iter().enumerate() {
        if let Command::DeletePods(target) = command {
            let job_first = trace[..i].iter().any(|c| match c {
                Command::DeleteJobs(t) => t.group() == target.group(),
                _ => false,
            });
            assert!(job_first, "pods of {} deleted before its jobs", target.group());
        }
    }
}

#[tokio::test]
async fn test_end_to_end_scenario_moves_one_instance_to_lowest_node() {
    let orchestrator = Arc::new(InMemoryOrchestrator::with_instances(vec![
        instance("g-1", "G", "C"),
        instance("g-2", "G", "C"),
    ]));
    let controller = controller(&orchestrator, 60.0);
    let snap = snapshot(&[("A", 80.0), ("B", 30.0), ("C", 95.0)]);

    let outcome = controller.run_cycle(&snap).await;
    let CycleOutcome::Migrated { completed, failed } = outcome else {
        panic!("expected a migration");
    };
    assert!(failed.is_empty());
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].phase, IntentPhase::Complete);
    assert_eq!((completed[0].from.as_str(), completed[0].to.as_str()), ("C", "B"));

    let job = completed[0].job.clone().unwrap();
    let target = DeleteTarget::Job {
        group: "G".into(),
        job,
    };
    assert_eq!(
        orchestrator.trace(),
        vec![
            Command::DeleteJobs(target.clone()),
            Command::DeletePods(target),
            Command::PatchAffinity {
                group: "G".into(),
                node: "B".into()
            },
        ]
    );

    let placement = orchestrator.list_instances().await.unwrap();
    assert_eq!(placement.count("G", "C"), 1);
    assert_eq!(controller.last_stable().get().as_deref(), Some("B"));
}

#[tokio::test]
async fn test_stability_suppression_issues_no_commands() {
    let orchestrator = Arc::new(InMemoryOrchestrator::with_instances(vec![
        instance("g-1", "G", "A"),
        instance("g-2", "G", "A"),
        instance("g-3", "G", "A"),
    ]));
    let controller = controller(&orchestrator, 60.0);
    let snap = snapshot(&[("A", 85.0), ("B", 20.0)]);

    assert!(matches!(
        controller.run_cycle(&snap).await,
        CycleOutcome::Migrated { .. }
    ));
    assert_eq!(controller.last_stable().get().as_deref(), Some("B"));
    orchestrator.clear_trace();

    let outcome = controller.run_cycle(&snap).await;
    assert!(matches!(
        outcome,
        CycleOutcome::NoAction(NoActionReason::StableDestination(ref n)) if n == "B"
    ));
    assert!(orchestrator.trace().is_empty());
}

#[tokio::test]
async fn test_last_stable_cleared_when_nothing_overloaded() {
    let orchestrator = Arc::new(InMemoryOrchestrator::new());
    let controller = controller(&orchestrator, 60.0);
    controller.last_stable().set(Some("B".into())).unwrap();

    let outcome = controller.run_cycle(&snapshot(&[("A", 10.0), ("B", 20.0)])).await;
    assert!(matches!(
        outcome,
        CycleOutcome::NoAction(NoActionReason::NoOverloaded)
    ));
    assert_eq!(controller.last_stable().get(), None);
}

#[tokio::test]
async fn test_occupancy_floor_refuses_last_instance() {
    let orchestrator = Arc::new(InMemoryOrchestrator::with_instances(vec![
        instance("g-1", "G", "C"),
        instance("h-1", "H", "C"),
    ]));
    let controller = controller(&orchestrator, 60.0);

    let err = controller
        .execute(PlacementIntent::new("G", "C", "B"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MigrationError::OccupancyFloor { count: 1, .. }
    ));
    assert!(orchestrator.trace().is_empty());
    assert_eq!(orchestrator.list_instances().await.unwrap().count("G", "C"), 1);
}

#[tokio::test]
async fn test_occupancy_never_reaches_zero_over_many_cycles() {
    let orchestrator = Arc::new(InMemoryOrchestrator::with_instances(
        (1..=5).map(|i| instance(&format!("g-{}", i), "G", "C")).collect(),
    ));
    let controller = controller(&orchestrator, 60.0);

    for round in 0..8 {
        // alternate destinations so suppression never kicks in
        let snap = if round % 2 == 0 {
            snapshot(&[("A", 10.0), ("B", 30.0), ("C", 95.0)])
        } else {
            snapshot(&[("A", 30.0), ("B", 10.0), ("C", 95.0)])
        };
        let before = orchestrator.list_instances().await.unwrap().count("G", "C");
        controller.run_cycle(&snap).await;
        let after = orchestrator.list_instances().await.unwrap().count("G", "C");

        assert!(after >= 1);
        assert!(before - after <= 1);
    }
    assert_eq!(orchestrator.list_instances().await.unwrap().count("G", "C"), 1);
}

#[tokio::test]
async fn test_patch_is_idempotent() {
    let orchestrator = InMemoryOrchestrator::new();

    let first = ensure_affinity(&orchestrator, "G", "gpu-node", "orin").await.unwrap();
    let read_one = orchestrator.read_affinity("G").await.unwrap();
    let second = ensure_affinity(&orchestrator, "G", "gpu-node", "orin").await.unwrap();
    let read_two = orchestrator.read_affinity("G").await.unwrap();

    assert!(first);
    assert!(!second);
    assert_eq!(read_one, read_two);
    assert_eq!(orchestrator.trace().len(), 1);
}

#[tokio::test]
async fn test_patch_replaces_other_node() {
    let orchestrator = InMemoryOrchestrator::new();
    orchestrator.set_affinity("G", NodeAffinity::pin("gpu-node", "agx"));

    assert!(ensure_affinity(&orchestrator, "G", "gpu-node", "orin").await.unwrap());
    assert!(orchestrator.affinity("G").unwrap().pins("gpu-node", "orin"));
}

#[tokio::test]
async fn test_failed_step_aborts_and_next_cycle_recovers() {
    let orchestrator = Arc::new(InMemoryOrchestrator::with_instances(vec![
        instance("g-1", "G", "C"),
        instance("g-2", "G", "C"),
    ]));
    let controller = controller(&orchestrator, 60.0);
    let snap = snapshot(&[("B", 30.0), ("C", 95.0)]);

    orchestrator.fail(Operation::DeletePods);
    let CycleOutcome::Migrated { completed, failed } = controller.run_cycle(&snap).await else {
        panic!("expected a migration attempt");
    };
    assert!(completed.is_empty());
    assert!(matches!(
        failed[0].1,
        MigrationError::Step {
            phase: IntentPhase::JobDeleted,
            ..
        }
    ));
    assert!(!orchestrator
        .trace()
        .iter()
        .any(|c| matches!(c, Command::PatchAffinity { .. })));
    assert_eq!(controller.last_stable().get(), None);

    orchestrator.heal(Operation::DeletePods);
    let CycleOutcome::Migrated { completed, .. } = controller.run_cycle(&snap).await else {
        panic!("expected a migration retry");
    };
    assert_eq!(completed.len(), 1);
    assert_eq!(orchestrator.list_instances().await.unwrap().count("G", "C"), 1);
    assert_jobs_before_pods(&orchestrator.trace());
}

#[tokio::test]
async fn test_placement_read_failure_skips_cycle() {
    let orchestrator = Arc::new(InMemoryOrchestrator::new());
    orchestrator.fail(Operation::ListInstances);
    let controller = controller(&orchestrator, 60.0);

    let outcome = controller
        .run_cycle(&snapshot(&[("A", 90.0), ("B", 10.0)]))
        .await;
    assert!(matches!(outcome, CycleOutcome::Skipped(_)));
    assert!(orchestrator.trace().is_empty());
}

#[tokio::test]
async fn test_teardown_deletes_all_jobs_before_any_pod() {
    let orchestrator = InMemoryOrchestrator::with_instances(vec![
        instance("g-1", "G", "A"),
        instance("h-1", "H", "B"),
    ]);
    let groups = vec!["G".to_string(), "H".to_string()];

    let report = teardown(&orchestrator, &groups).await;
    assert!(report.is_complete());
    assert_eq!(report.jobs_deleted, 2);
    assert_eq!(report.pods_deleted, 2);

    let trace = orchestrator.trace();
    let last_job = trace
        .iter()
        .rposition(|c| matches!(c, Command::DeleteJobs(_)))
        .unwrap();
    let first_pod = trace
        .iter()
        .position(|c| matches!(c, Command::DeletePods(_)))
        .unwrap();
    assert!(last_job < first_pod);
}

#[tokio::test]
async fn test_teardown_keeps_pods_when_jobs_fail() {
    let orchestrator = InMemoryOrchestrator::with_instances(vec![instance("g-1", "G", "A")]);
    orchestrator.fail(Operation::DeleteJobs);

    let report = teardown(&orchestrator, &["G".to_string()]).await;
    assert_eq!(report.failed_groups, vec!["G".to_string()]);
    assert!(orchestrator.trace().is_empty());
    assert_eq!(orchestrator.list_instances().await.unwrap().instances.len(), 1);
}

struct FixedBackend(f64);

#[async_trait]
impl MetricsBackend for FixedBackend {
    async fn query_instant(&self, _expression: &str) -> anyhow::Result<Vec<Sample>> {
        Ok(vec![Sample {
            labels: Default::default(),
            value: self.0,
            timestamp: 0.0,
        }])
    }

    async fn query_range(
        &self,
        expression: &str,
        _start: chrono::DateTime<chrono::Utc>,
        _end: chrono::DateTime<chrono::Utc>,
        _step: Duration,
    ) -> anyhow::Result<Vec<Sample>> {
        self.query_instant(expression).await
    }
}

fn fixed_client(value: f64) -> TelemetryClient {
    TelemetryClient::new(
        Arc::new(FixedBackend(value)),
        vec![NodeTarget::new("A", "gpu", "a:9100")],
        Duration::from_secs(1),
    )
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

fn supervisor(orchestrator: &Arc<InMemoryOrchestrator>) -> RebalanceSupervisor {
    RebalanceSupervisor::builder(
        Arc::new(controller(orchestrator, 60.0)),
        fixed_client(20.0),
        vec!["G".to_string(), "H".to_string()],
    )
    .window(WindowSpec::new(1, Duration::from_millis(1)))
    .interval(Duration::from_secs(3600))
    .build()
}

#[tokio::test]
async fn test_supervisor_start_stop() {
    let orchestrator = Arc::new(InMemoryOrchestrator::new());
    let supervisor = supervisor(&orchestrator);

    assert!(supervisor.start().await);
    assert!(!supervisor.start().await);
    assert!(supervisor.is_running().await);

    assert!(supervisor.stop().await);
    assert!(!supervisor.is_running().await);
    assert!(!supervisor.stop().await);
}

#[tokio::test]
async fn test_deactivation_stops_loop_and_tears_down() {
    let orchestrator = Arc::new(InMemoryOrchestrator::with_instances(vec![
        instance("g-1", "G", "A"),
        instance("h-1", "H", "A"),
    ]));
    let supervisor = supervisor(&orchestrator);
    supervisor.activated().await;
    assert!(supervisor.is_running().await);

    supervisor.deactivated().await;
    assert!(!supervisor.is_running().await);
    assert!(orchestrator
        .list_instances()
        .await
        .unwrap()
        .instances
        .is_empty());
    assert_jobs_before_pods(&orchestrator.trace());
}

#[tokio::test]
async fn test_pending_stop_wins_over_due_tick() {
    let orchestrator = Arc::new(InMemoryOrchestrator::new());
    let controller = Arc::new(controller(&orchestrator, 60.0));
    controller
        .last_stable()
        .set(Some("A".to_string()))
        .unwrap();

    let rebalance = RebalanceLoop::new(
        Arc::clone(&controller),
        fixed_client(20.0),
        WindowSpec::new(1, Duration::from_millis(1)),
        Duration::from_secs(3600),
    );
    let (stop, rx) = tokio::sync::broadcast::channel(1);
    stop.send(()).unwrap();
    rebalance.run(rx).await;

    // A cycle over an idle node would have cleared the stable destination
    assert_eq!(controller.last_stable().get().as_deref(), Some("A"));
}

#[tokio::test]
async fn test_incomplete_teardown_retried_while_saturated() {
    let orchestrator = Arc::new(InMemoryOrchestrator::with_instances(vec![
        instance("g-1", "G", "A"),
        instance("h-1", "H", "B"),
    ]));
    let supervisor = Arc::new(supervisor(&orchestrator));
    let service = ScalerService::new(SnapshotStore::new(), 90.0, ScalerSettings::default())
        .with_listener(supervisor.clone());
    let saturated = snapshot(&[("A", 95.0), ("B", 92.0)]);

    orchestrator.fail(Operation::DeleteJobs);
    assert!(!service.evaluate(&saturated));
    settle().await;
    assert_eq!(orchestrator.list_instances().await.unwrap().instances.len(), 2);

    orchestrator.heal(Operation::DeleteJobs);
    assert!(!service.evaluate(&saturated));
    settle().await;
    assert!(orchestrator
        .list_instances()
        .await
        .unwrap()
        .instances
        .is_empty());
    assert!(!orchestrator.has_job("g-1"));
    assert!(!orchestrator.has_job("h-1"));
    assert_jobs_before_pods(&orchestrator.trace());

    orchestrator.clear_trace();
    assert!(!service.evaluate(&saturated));
    settle().await;
    assert!(orchestrator.trace().is_empty());
}

#[tokio::test]
async fn test_activation_drops_pending_teardown() {
    let orchestrator = Arc::new(InMemoryOrchestrator::with_instances(vec![instance(
        "g-1", "G", "A",
    )]));
    let supervisor = supervisor(&orchestrator);

    orchestrator.fail(Operation::DeleteJobs);
    supervisor.deactivated().await;
    orchestrator.heal(Operation::DeleteJobs);

    supervisor.activated().await;
    assert!(!supervisor.take_teardown_pending());
    assert!(supervisor.stop().await);
}
