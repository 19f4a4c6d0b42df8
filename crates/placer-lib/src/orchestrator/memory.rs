//! In-memory orchestrator
//!
//! Keeps instances and group affinities in process and records every
//! mutating command in order. Used for dry runs and to check ordering,
//! idempotence and occupancy properties against a command trace.

use super::{DeleteTarget, NodeAffinity, Orchestrator, OrchestratorError};
use crate::models::{Placement, Workload};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::Mutex;

/// Orchestrator operation kinds, for failure injection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    ListInstances,
    DeleteJobs,
    DeletePods,
    ReadAffinity,
    PatchAffinity,
}

/// A mutating command that reached the orchestrator
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    DeleteJobs(DeleteTarget),
    DeletePods(DeleteTarget),
    PatchAffinity { group: String, node: String },
}

impl Command {
    pub fn group(&self) -> &str {
        match self {
            Command::DeleteJobs(t) | Command::DeletePods(t) => t.group(),
            Command::PatchAffinity { group, .. } => group,
        }
    }
}

#[derive(Debug, Default)]
pub struct InMemoryOrchestrator {
    instances: Mutex<Vec<Workload>>,
    /// Live jobs and the group each belongs to
    jobs: DashMap<String, String>,
    affinities: DashMap<String, NodeAffinity>,
    failing: DashSet<Operation>,
    trace: Mutex<Vec<Command>>,
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with instances; every instance's job becomes a live job
    pub fn with_instances(instances: Vec<Workload>) -> Self {
        let orchestrator = Self::new();
        for w in &instances {
            if let Some(job) = &w.job {
                orchestrator.jobs.insert(job.clone(), w.group.clone());
            }
        }
        *lock(&orchestrator.instances) = instances;
        orchestrator
    }

    pub fn set_affinity(&self, group: &str, affinity: NodeAffinity) {
        self.affinities.insert(group.to_string(), affinity);
    }

    pub fn affinity(&self, group: &str) -> Option<NodeAffinity> {
        self.affinities.get(group).map(|a| a.clone())
    }

    /// Make every call of `op` fail until [`heal`](Self::heal) is called
    pub fn fail(&self, op: Operation) {
        self.failing.insert(op);
    }

    pub fn heal(&self, op: Operation) {
        self.failing.remove(&op);
    }

    pub fn has_job(&self, job: &str) -> bool {
        self.jobs.contains_key(job)
    }

    /// Mutating commands in the order they were applied
    pub fn trace(&self) -> Vec<Command> {
        lock(&self.trace).clone()
    }

    pub fn clear_trace(&self) {
        lock(&self.trace).clear();
    }

    fn check(&self, op: Operation) -> Result<(), OrchestratorError> {
        if self.failing.contains(&op) {
            return Err(OrchestratorError::Transport(format!(
                "injected failure for {:?}",
                op
            )));
        }
        Ok(())
    }

    fn record(&self, command: Command) {
        lock(&self.trace).push(command);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl Orchestrator for InMemoryOrchestrator {
    async fn list_instances(&self) -> Result<Placement, OrchestratorError> {
        self.check(Operation::ListInstances)?;
        Ok(Placement::new(lock(&self.instances).clone()))
    }

    async fn delete_jobs(&self, target: &DeleteTarget) -> Result<usize, OrchestratorError> {
        self.check(Operation::DeleteJobs)?;
        self.record(Command::DeleteJobs(target.clone()));

        let deleted = match target {
            DeleteTarget::Job { job, .. } => usize::from(self.jobs.remove(job).is_some()),
            DeleteTarget::Group(group) => {
                let before = self.jobs.len();
                self.jobs.retain(|_, g| g.as_str() != group.as_str());
                before - self.jobs.len()
            }
        };
        Ok(deleted)
    }

    async fn delete_pods(&self, target: &DeleteTarget) -> Result<usize, OrchestratorError> {
        self.check(Operation::DeletePods)?;
        self.record(Command::DeletePods(target.clone()));

        let mut instances = lock(&self.instances);
        let before = instances.len();
        instances.retain(|w| match target {
            DeleteTarget::Job { job, .. } => w.job.as_deref() != Some(job.as_str()),
            DeleteTarget::Group(group) => &w.group != group,
        });
        Ok(before - instances.len())
    }

    async fn read_affinity(&self, group: &str) -> Result<Option<NodeAffinity>, OrchestratorError> {
        self.check(Operation::ReadAffinity)?;
        Ok(self.affinity(group))
    }

    async fn patch_affinity(
        &self,
        group: &str,
        affinity: &NodeAffinity,
    ) -> Result<(), OrchestratorError> {
        self.check(Operation::PatchAffinity)?;
        self.record(Command::PatchAffinity {
            group: group.to_string(),
            node: affinity.values.join(","),
        });
        self.affinities.insert(group.to_string(), affinity.clone());
        Ok(())
    }
}
