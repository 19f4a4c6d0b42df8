//! Orchestrator seam
//!
//! The controller only needs five operations from the cluster: list live
//! instances, delete jobs, delete pods, and read or patch a group's node
//! affinity. Deletes are idempotent: an object that is already gone counts
//! as deleted.

mod affinity;
mod k8s;
mod memory;

pub use affinity::NodeAffinity;
pub use k8s::KubeOrchestrator;
pub use memory::{Command, InMemoryOrchestrator, Operation};

use crate::models::Placement;
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },
    #[error("orchestrator rejected {operation}: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },
    #[error("orchestrator unreachable: {0}")]
    Transport(String),
}

impl OrchestratorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, OrchestratorError::NotFound { .. })
    }
}

/// What a delete applies to
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeleteTarget {
    /// Every job or pod of the group
    Group(String),
    /// One job of the group, or that job's pods
    Job { group: String, job: String },
}

impl DeleteTarget {
    pub fn group(&self) -> &str {
        match self {
            DeleteTarget::Group(group) => group,
            DeleteTarget::Job { group, .. } => group,
        }
    }
}

impl fmt::Display for DeleteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteTarget::Group(group) => write!(f, "group {}", group),
            DeleteTarget::Job { group, job } => write!(f, "job {} of group {}", job, group),
        }
    }
}

/// Operations the controller invokes on the cluster
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// Live instances of the configured groups with node and phase
    async fn list_instances(&self) -> Result<Placement, OrchestratorError>;

    /// Delete jobs; returns how many were deleted
    async fn delete_jobs(&self, target: &DeleteTarget) -> Result<usize, OrchestratorError>;

    /// Delete pods; returns how many were deleted
    async fn delete_pods(&self, target: &DeleteTarget) -> Result<usize, OrchestratorError>;

    /// Current node affinity of a group's template, if any
    async fn read_affinity(&self, group: &str) -> Result<Option<NodeAffinity>, OrchestratorError>;

    /// Replace a group's required node affinity
    async fn patch_affinity(
        &self,
        group: &str,
        affinity: &NodeAffinity,
    ) -> Result<(), OrchestratorError>;
}

/// Resolve the group of a pod from its name.
///
/// Pod names look like `<group>-<job suffix>-<pod suffix>`; the longest
/// configured group that is a `-`-terminated prefix wins.
pub fn group_from_name<'a>(name: &str, groups: &'a [String]) -> Option<&'a str> {
    groups
        .iter()
        .filter(|g| {
            name.strip_prefix(g.as_str())
                .map(|rest| rest.starts_with('-'))
                .unwrap_or(false)
        })
        .max_by_key(|g| g.len())
        .map(String::as_str)
}
