//! Core data models for the placement controller

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Native scale of a node's utilization metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricScale {
    /// Values are already 0-100
    #[default]
    Percent,
    /// Values are 0-1 and are multiplied by 100 at ingestion
    Fraction,
}

impl MetricScale {
    /// Convert a raw sample into percent
    pub fn to_percent(self, raw: f64) -> f64 {
        match self {
            MetricScale::Percent => raw,
            MetricScale::Fraction => raw * 100.0,
        }
    }
}

/// A node of the scheduling pool and how to query its utilization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTarget {
    /// Orchestrator node name (also the affinity value)
    pub name: String,
    /// Metric name exported for this node
    pub metric: String,
    /// Instance label of the exporter, e.g. `192.168.1.135:9100`
    pub instance: String,
    #[serde(default)]
    pub scale: MetricScale,
    /// Full query expression overriding `metric{instance="..."}`
    #[serde(default)]
    pub expression: Option<String>,
}

impl NodeTarget {
    pub fn new(
        name: impl Into<String>,
        metric: impl Into<String>,
        instance: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            metric: metric.into(),
            instance: instance.into(),
            scale: MetricScale::Percent,
            expression: None,
        }
    }

    /// The query expression used for this node
    pub fn query_expression(&self) -> String {
        match &self.expression {
            Some(expr) => expr.clone(),
            None => format!("{}{{instance=\"{}\"}}", self.metric, self.instance),
        }
    }
}

/// One utilization reading for a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeTelemetry {
    pub node: String,
    pub metric: String,
    pub instance: String,
    /// Utilization in percent
    pub value: f64,
    pub sampled_at: DateTime<Utc>,
}

/// Averaged utilization per node.
///
/// Nodes without a successful sample are absent, never zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSnapshot {
    pub utilization: BTreeMap<String, f64>,
    pub taken_at: Option<DateTime<Utc>>,
}

impl UtilizationSnapshot {
    pub fn new(utilization: BTreeMap<String, f64>) -> Self {
        Self {
            utilization,
            taken_at: Some(Utc::now()),
        }
    }

    pub fn get(&self, node: &str) -> Option<f64> {
        self.utilization.get(node).copied()
    }

    pub fn contains(&self, node: &str) -> bool {
        self.utilization.contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.utilization.len()
    }

    pub fn is_empty(&self) -> bool {
        self.utilization.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.utilization.iter().map(|(n, v)| (n.as_str(), *v))
    }
}

impl FromIterator<(String, f64)> for UtilizationSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Orchestrator phase of a workload instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkloadPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl WorkloadPhase {
    pub fn parse(phase: &str) -> Self {
        match phase {
            "Pending" => WorkloadPhase::Pending,
            "Running" => WorkloadPhase::Running,
            "Succeeded" => WorkloadPhase::Succeeded,
            "Failed" => WorkloadPhase::Failed,
            _ => WorkloadPhase::Unknown,
        }
    }

    /// Whether the instance still occupies its node
    pub fn is_active(self) -> bool {
        matches!(self, WorkloadPhase::Pending | WorkloadPhase::Running)
    }
}

impl fmt::Display for WorkloadPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkloadPhase::Pending => "Pending",
            WorkloadPhase::Running => "Running",
            WorkloadPhase::Succeeded => "Succeeded",
            WorkloadPhase::Failed => "Failed",
            WorkloadPhase::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// A live workload instance as reported by the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    /// Pod name
    pub name: String,
    /// Owning job, if known
    pub job: Option<String>,
    /// Workload group the instance belongs to
    pub group: String,
    /// Node the instance is bound to; `None` while unscheduled
    pub node: Option<String>,
    pub phase: WorkloadPhase,
}

impl Workload {
    pub fn is_on(&self, node: &str) -> bool {
        self.node.as_deref() == Some(node)
    }
}

/// Live placement read from the orchestrator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Placement {
    pub instances: Vec<Workload>,
}

impl Placement {
    pub fn new(instances: Vec<Workload>) -> Self {
        Self { instances }
    }

    /// Active instances of `group` on `node`
    pub fn count(&self, group: &str, node: &str) -> usize {
        self.instances
            .iter()
            .filter(|w| w.group == group && w.is_on(node) && w.phase.is_active())
            .count()
    }

    /// Active instances per node across all groups
    pub fn per_node(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for w in self.instances.iter().filter(|w| w.phase.is_active()) {
            if let Some(node) = &w.node {
                *counts.entry(node.clone()).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Active instances bound to `node`
    pub fn on_node<'a>(&'a self, node: &str) -> impl Iterator<Item = &'a Workload> + 'a {
        let node = node.to_string();
        self.instances
            .iter()
            .filter(move |w| w.is_on(&node) && w.phase.is_active())
    }
}

/// Progress of a single migration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IntentPhase {
    Decided,
    JobDeleted,
    PodsCleaned,
    AffinityPatched,
    Complete,
}

impl fmt::Display for IntentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntentPhase::Decided => "decided",
            IntentPhase::JobDeleted => "job_deleted",
            IntentPhase::PodsCleaned => "pods_cleaned",
            IntentPhase::AffinityPatched => "affinity_patched",
            IntentPhase::Complete => "complete",
        };
        f.write_str(s)
    }
}

/// Decided move of one instance of a workload group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementIntent {
    pub group: String,
    pub from: String,
    pub to: String,
    /// Job owning the instance chosen to move, when known
    pub job: Option<String>,
    pub phase: IntentPhase,
}

impl PlacementIntent {
    pub fn new(group: impl Into<String>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            from: from.into(),
            to: to.into(),
            job: None,
            phase: IntentPhase::Decided,
        }
    }

    pub fn with_job(mut self, job: Option<String>) -> Self {
        self.job = job;
        self
    }

    pub(crate) fn advance(&mut self, phase: IntentPhase) {
        debug_assert!(phase > self.phase);
        self.phase = phase;
    }
}
