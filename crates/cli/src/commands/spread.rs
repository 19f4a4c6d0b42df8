//! Initial spread of workload groups over the sampled nodes

use anyhow::{Context, Result};
use placer_lib::migration::ensure_affinity;
use placer_lib::orchestrator::{KubeOrchestrator, Orchestrator};
use placer_lib::policy::{plan_initial_spread, SpreadPlan};
use placer_lib::telemetry::{PrometheusBackend, TelemetryClient};
use placer_lib::Settings;
use serde::Serialize;
use std::sync::Arc;
use tabled::Tabled;
use tracing::debug;

use crate::config::kube_client;
use crate::output::{
    color_status, format_percent, print_info, print_json, print_success, print_table,
    print_warning, OutputFormat,
};

#[derive(Tabled)]
struct AssignmentRow {
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Utilization")]
    utilization: String,
    #[tabled(rename = "Result")]
    result: String,
}

/// Outcome of applying one assignment
#[derive(Debug, Clone, Serialize)]
struct Applied {
    group: String,
    node: String,
    /// `planned`, `patched`, `unchanged` or `failed: <reason>`
    result: String,
}

/// Patch every assignment of `plan`; failures are reported per group
async fn apply_plan(
    orchestrator: &dyn Orchestrator,
    plan: &SpreadPlan,
    affinity_key: &str,
) -> Vec<Applied> {
    let mut applied = Vec::with_capacity(plan.assignments.len());
    for (group, node) in &plan.assignments {
        let result = match ensure_affinity(orchestrator, group, affinity_key, node).await {
            Ok(true) => "patched".to_string(),
            Ok(false) => "unchanged".to_string(),
            Err(e) => format!("failed: {}", e),
        };
        debug!(group = %group, node = %node, result = %result, "Spread assignment applied");
        applied.push(Applied {
            group: group.clone(),
            node: node.clone(),
            result,
        });
    }
    applied
}

/// Sample once, plan the spread and (unless `dry_run`) patch affinities
pub async fn run_spread(
    settings: &Settings,
    kubeconfig: Option<&str>,
    dry_run: bool,
    format: OutputFormat,
) -> Result<()> {
    let backend = Arc::new(
        PrometheusBackend::new(&settings.prometheus_url, settings.query_timeout())
            .context("Failed to create metrics backend")?,
    );
    let telemetry = TelemetryClient::new(backend, settings.nodes.clone(), settings.query_timeout());
    let snapshot = telemetry.snapshot_instant().await;

    let plan = plan_initial_spread(&settings.groups, &snapshot, &mut rand::thread_rng())?;

    let applied = if dry_run {
        plan.assignments
            .iter()
            .map(|(group, node)| Applied {
                group: group.clone(),
                node: node.clone(),
                result: "planned".to_string(),
            })
            .collect()
    } else {
        let client = kube_client(kubeconfig).await?;
        let orchestrator = KubeOrchestrator::new(
            client,
            settings.namespace.clone(),
            settings.group_label.clone(),
            settings.groups.clone(),
        );
        apply_plan(&orchestrator, &plan, &settings.affinity_key).await
    };

    if format == OutputFormat::Json {
        return print_json(&applied);
    }

    if dry_run {
        print_info("Dry run: no affinity was changed");
    }
    let rows: Vec<AssignmentRow> = applied
        .iter()
        .map(|a| AssignmentRow {
            group: a.group.clone(),
            node: a.node.clone(),
            utilization: snapshot
                .get(&a.node)
                .map(format_percent)
                .unwrap_or_else(|| "-".to_string()),
            result: color_status(&a.result),
        })
        .collect();
    print_table(&rows, "No workload groups configured");

    let failed = applied.iter().filter(|a| a.result.starts_with("failed")).count();
    if failed > 0 {
        print_warning(&format!("{} group(s) could not be patched", failed));
        anyhow::bail!("spread incomplete");
    }
    if !dry_run {
        print_success(&format!("Spread {} group(s) over {} node(s)", applied.len(), plan.counts.len()));
    }
    Ok(())
}
