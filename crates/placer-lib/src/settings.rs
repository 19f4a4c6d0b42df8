//! Controller settings
//!
//! Loaded from an optional config file layered under `PLACER__*`
//! environment variables. All utilization values are percent (0-100).

use crate::models::NodeTarget;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the config file
pub const CONFIG_PATH_ENV: &str = "EDGE_PLACER_CONFIG";

/// Startup configuration errors
#[derive(Debug, Error, PartialEq)]
pub enum SettingsError {
    #[error("no nodes configured")]
    NoNodes,
    #[error("no workload groups configured")]
    NoGroups,
    #[error("duplicate node name: {0}")]
    DuplicateNode(String),
    #[error("duplicate workload group: {0}")]
    DuplicateGroup(String),
    #[error("node {node}: invalid metric name {metric:?}")]
    InvalidMetric { node: String, metric: String },
    #[error("node {node}: invalid query expression: {reason}")]
    InvalidExpression { node: String, reason: &'static str },
    #[error("node {0}: empty instance label")]
    EmptyInstance(String),
    #[error("{name} threshold {value} is outside 0..=100")]
    ThresholdOutOfRange { name: &'static str, value: f64 },
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
    #[error("sampling window ({window}s) is shorter than the sub-interval ({every}s)")]
    WindowTooShort { window: u64, every: u64 },
}

/// Utilization thresholds in percent
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Thresholds {
    /// A node below this accepts new instances (scaler admission)
    #[serde(default = "default_admission")]
    pub admission_percent: f64,
    /// A node above this is overloaded for rebalancing
    #[serde(default = "default_rebalance")]
    pub rebalance_percent: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            admission_percent: default_admission(),
            rebalance_percent: default_rebalance(),
        }
    }
}

fn default_admission() -> f64 {
    90.0
}

fn default_rebalance() -> f64 {
    50.0
}

/// Loop intervals and sampling windows, in seconds
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SamplingSettings {
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
    #[serde(default = "default_rebalance_interval")]
    pub rebalance_interval_secs: u64,
    #[serde(default = "default_window")]
    pub window_secs: u64,
    #[serde(default = "default_sample_every")]
    pub sample_every_secs: u64,
    #[serde(default = "default_overload_interval")]
    pub overload_interval_secs: u64,
    #[serde(default = "default_overload_window")]
    pub overload_window_secs: u64,
}

impl Default for SamplingSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval(),
            rebalance_interval_secs: default_rebalance_interval(),
            window_secs: default_window(),
            sample_every_secs: default_sample_every(),
            overload_interval_secs: default_overload_interval(),
            overload_window_secs: default_overload_window(),
        }
    }
}

impl SamplingSettings {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn rebalance_interval(&self) -> Duration {
        Duration::from_secs(self.rebalance_interval_secs)
    }

    pub fn sample_every(&self) -> Duration {
        Duration::from_secs(self.sample_every_secs)
    }

    /// Number of samples taken within one rebalancing window
    pub fn samples_per_window(&self) -> usize {
        (self.window_secs / self.sample_every_secs.max(1)).max(1) as usize
    }

    pub fn overload_interval(&self) -> Duration {
        Duration::from_secs(self.overload_interval_secs)
    }

    pub fn overload_window(&self) -> Duration {
        Duration::from_secs(self.overload_window_secs)
    }
}

fn default_interval() -> u64 {
    15
}

fn default_rebalance_interval() -> u64 {
    30
}

fn default_window() -> u64 {
    30
}

fn default_sample_every() -> u64 {
    5
}

fn default_overload_interval() -> u64 {
    900
}

fn default_overload_window() -> u64 {
    900
}

/// Which value `GetMetrics` reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Sum of `100 - utilization` over admissible nodes
    #[default]
    SpareCapacity,
    /// Number of admissible nodes
    AvailableNodes,
}

/// Autoscaler RPC surface
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScalerSettings {
    #[serde(default = "default_scaler_port")]
    pub port: u16,
    #[serde(default = "default_metric_name")]
    pub metric_name: String,
    #[serde(default)]
    pub metric_kind: MetricKind,
}

impl Default for ScalerSettings {
    fn default() -> Self {
        Self {
            port: default_scaler_port(),
            metric_name: default_metric_name(),
            metric_kind: MetricKind::default(),
        }
    }
}

fn default_scaler_port() -> u16 {
    50051
}

fn default_metric_name() -> String {
    "gpu_trigger".to_string()
}

/// Complete controller configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default = "default_group_label")]
    pub group_label: String,
    #[serde(default = "default_affinity_key")]
    pub affinity_key: String,
    #[serde(default)]
    pub nodes: Vec<NodeTarget>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub sampling: SamplingSettings,
    #[serde(default)]
    pub scaler: ScalerSettings,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    /// Run the rebalancer before the autoscaler first reports activity
    #[serde(default)]
    pub start_rebalancer: bool,
}

fn default_prometheus_url() -> String {
    "http://localhost:9090".to_string()
}

fn default_query_timeout() -> u64 {
    3
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_group_label() -> String {
    "scaledjob.keda.sh/name".to_string()
}

fn default_affinity_key() -> String {
    "gpu-node".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_state_path() -> PathBuf {
    PathBuf::from("last_stable.json")
}

impl Settings {
    /// Load settings from `EDGE_PLACER_CONFIG` (default `placer.toml`) and
    /// the environment, then validate them
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| "placer.toml".to_string());
        Self::load_from(Some(&path))
    }

    /// Load settings from an explicit file (if any) and the environment
    pub fn load_from(path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix("PLACER")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parse settings from a TOML string and validate them
    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let settings: Settings = config::Config::builder()
            .add_source(config::File::from_str(text, config::FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// Reject configurations that cannot work at runtime
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.nodes.is_empty() {
            return Err(SettingsError::NoNodes);
        }
        if self.groups.is_empty() {
            return Err(SettingsError::NoGroups);
        }

        let mut seen = HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.name.as_str()) {
                return Err(SettingsError::DuplicateNode(node.name.clone()));
            }
            if let Some(expression) = &node.expression {
                check_expression(expression).map_err(|reason| SettingsError::InvalidExpression {
                    node: node.name.clone(),
                    reason,
                })?;
            } else if !is_metric_name(&node.metric) {
                return Err(SettingsError::InvalidMetric {
                    node: node.name.clone(),
                    metric: node.metric.clone(),
                });
            }
            if node.expression.is_none() && node.instance.trim().is_empty() {
                return Err(SettingsError::EmptyInstance(node.name.clone()));
            }
        }

        let mut groups = HashSet::new();
        for group in &self.groups {
            if !groups.insert(group.as_str()) {
                return Err(SettingsError::DuplicateGroup(group.clone()));
            }
        }

        for (name, value) in [
            ("admission", self.thresholds.admission_percent),
            ("rebalance", self.thresholds.rebalance_percent),
        ] {
            if !(0.0..=100.0).contains(&value) {
                return Err(SettingsError::ThresholdOutOfRange { name, value });
            }
        }

        let s = &self.sampling;
        for (name, value) in [
            ("sampling.interval_secs", s.interval_secs),
            ("sampling.rebalance_interval_secs", s.rebalance_interval_secs),
            ("sampling.window_secs", s.window_secs),
            ("sampling.sample_every_secs", s.sample_every_secs),
            ("sampling.overload_interval_secs", s.overload_interval_secs),
            ("sampling.overload_window_secs", s.overload_window_secs),
            ("query_timeout_secs", self.query_timeout_secs),
        ] {
            if value == 0 {
                return Err(SettingsError::ZeroInterval(name));
            }
        }
        if s.window_secs < s.sample_every_secs {
            return Err(SettingsError::WindowTooShort {
                window: s.window_secs,
                every: s.sample_every_secs,
            });
        }

        Ok(())
    }
}

/// Lexical check of a query expression: non-empty, quotes terminated and
/// brackets balanced outside of string literals
fn check_expression(expression: &str) -> Result<(), &'static str> {
    if expression.trim().is_empty() {
        return Err("empty expression");
    }

    let mut open = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in expression.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' && q != '`' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' | '`' => quote = Some(c),
            '(' | '{' | '[' => open.push(c),
            ')' | '}' | ']' => {
                let expected = match c {
                    ')' => '(',
                    '}' => '{',
                    _ => '[',
                };
                if open.pop() != Some(expected) {
                    return Err("unbalanced brackets");
                }
            }
            _ => {}
        }
    }

    if quote.is_some() {
        return Err("unterminated string literal");
    }
    if !open.is_empty() {
        return Err("unbalanced brackets");
    }
    Ok(())
}

/// Prometheus metric name grammar: `[a-zA-Z_:][a-zA-Z0-9_:]*`
fn is_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == ':' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}
