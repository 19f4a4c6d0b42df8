//! Controller status: latest snapshot and live placement

use anyhow::Result;
use placer_lib::settings::Thresholds;
use placer_lib::Placement;
use serde::Serialize;
use std::collections::BTreeSet;
use tabled::Tabled;

use crate::client::{ApiClient, SnapshotResponse};
use crate::output::{
    color_status, color_utilization, format_age, print_info, print_json, print_table,
    print_warning, OutputFormat,
};

/// Row for the nodes table
#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Utilization")]
    utilization: String,
    #[tabled(rename = "Instances")]
    instances: usize,
    #[tabled(rename = "Last Stable")]
    stable: String,
}

/// Row for the instances table
#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "Pod")]
    name: String,
    #[tabled(rename = "Group")]
    group: String,
    #[tabled(rename = "Job")]
    job: String,
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Phase")]
    phase: String,
}

#[derive(Serialize)]
struct StatusReport<'a> {
    snapshot: &'a SnapshotResponse,
    placement: &'a Placement,
}

fn node_rows(snapshot: &SnapshotResponse, placement: &Placement, thresholds: Thresholds) -> Vec<NodeRow> {
    let per_node = placement.per_node();
    let nodes: BTreeSet<&str> = snapshot
        .snapshot
        .utilization
        .keys()
        .map(String::as_str)
        .chain(per_node.keys().map(String::as_str))
        .collect();

    nodes
        .into_iter()
        .map(|node| NodeRow {
            node: node.to_string(),
            utilization: match snapshot.snapshot.get(node) {
                Some(u) => color_utilization(
                    u,
                    thresholds.rebalance_percent,
                    thresholds.admission_percent,
                ),
                None => "absent".to_string(),
            },
            instances: per_node.get(node).copied().unwrap_or(0),
            stable: if snapshot.last_stable.as_deref() == Some(node) {
                "*".to_string()
            } else {
                String::new()
            },
        })
        .collect()
}

/// Show the daemon's latest snapshot and the live placement
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let snapshot = client.snapshot().await?;
    let placement = client.placement().await?;

    if format == OutputFormat::Json {
        return print_json(&StatusReport {
            snapshot: &snapshot,
            placement: &placement,
        });
    }

    if snapshot.pass == 0 {
        print_warning("No sampling pass has completed yet");
    } else {
        print_info(&format!(
            "Sampling pass {} ({})",
            snapshot.pass,
            format_age(snapshot.snapshot.taken_at)
        ));
    }

    let nodes = node_rows(&snapshot, &placement, Thresholds::default());
    print_table(&nodes, "No nodes reported");

    println!();
    let instances: Vec<InstanceRow> = placement
        .instances
        .iter()
        .map(|w| InstanceRow {
            name: w.name.clone(),
            group: w.group.clone(),
            job: w.job.clone().unwrap_or_else(|| "-".to_string()),
            node: w.node.clone().unwrap_or_else(|| "-".to_string()),
            phase: color_status(&w.phase.to_string()),
        })
        .collect();
    print_table(&instances, "No workload instances found");

    Ok(())
}
