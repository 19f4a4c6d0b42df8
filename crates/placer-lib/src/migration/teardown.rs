//! Bulk teardown when no node has capacity

use crate::orchestrator::{DeleteTarget, Orchestrator};
use serde::Serialize;
use tracing::warn;

/// What a teardown removed
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TeardownReport {
    pub jobs_deleted: usize,
    pub pods_deleted: usize,
    /// Groups whose jobs or pods could not be deleted
    pub failed_groups: Vec<String>,
}

impl TeardownReport {
    pub fn is_complete(&self) -> bool {
        self.failed_groups.is_empty()
    }
}

/// Delete the jobs of every group, then their leftover pods.
///
/// A group whose job delete failed keeps its pods so they are never
/// deleted while a job could still respawn them.
pub async fn teardown(orchestrator: &dyn Orchestrator, groups: &[String]) -> TeardownReport {
    let mut report = TeardownReport::default();
    let mut jobs_gone = Vec::with_capacity(groups.len());

    for group in groups {
        match orchestrator
            .delete_jobs(&DeleteTarget::Group(group.clone()))
            .await
        {
            Ok(n) => {
                report.jobs_deleted += n;
                jobs_gone.push(group);
            }
            Err(e) => {
                warn!(group = %group, error = %e, "Failed to delete jobs during teardown");
                report.failed_groups.push(group.clone());
            }
        }
    }

    for group in jobs_gone {
        match orchestrator
            .delete_pods(&DeleteTarget::Group(group.clone()))
            .await
        {
            Ok(n) => report.pods_deleted += n,
            Err(e) => {
                warn!(group = %group, error = %e, "Failed to delete pods during teardown");
                report.failed_groups.push(group.clone());
            }
        }
    }

    report
}
