//! Kubernetes + KEDA binding
//!
//! A workload group is a KEDA `ScaledJob`. Its node affinity lives in the
//! job template; KEDA spawns one `Job` per instance and each job owns one
//! pod. Jobs and pods are traced to their group via the group label or,
//! when it is missing, the `<group>-` name prefix; pods are traced back to
//! their job via `job-name`.

use super::{group_from_name, DeleteTarget, NodeAffinity, Orchestrator, OrchestratorError};
use crate::models::{Placement, Workload, WorkloadPhase};
use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::batch::v1::Job;
use k8s_openapi::api::core::v1::Pod;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch,
    PatchParams,
};
use kube::{Client, ResourceExt};
use tracing::debug;

/// Label set by the job controller on every pod it creates
const JOB_NAME_LABEL: &str = "job-name";

/// Orchestrator backed by a Kubernetes API server
#[derive(Clone)]
pub struct KubeOrchestrator {
    client: Client,
    namespace: String,
    group_label: String,
    groups: Vec<String>,
    scaled_job: ApiResource,
}

impl KubeOrchestrator {
    pub fn new(
        client: Client,
        namespace: impl Into<String>,
        group_label: impl Into<String>,
        groups: Vec<String>,
    ) -> Self {
        let gvk = GroupVersionKind::gvk("keda.sh", "v1alpha1", "ScaledJob");
        Self {
            client,
            namespace: namespace.into(),
            group_label: group_label.into(),
            groups,
            scaled_job: ApiResource::from_gvk(&gvk),
        }
    }

    /// Connect using in-cluster config or the local kubeconfig
    pub async fn connect(
        namespace: impl Into<String>,
        group_label: impl Into<String>,
        groups: Vec<String>,
    ) -> anyhow::Result<Self> {
        let client = Client::try_default()
            .await
            .context("Failed to create Kubernetes client")?;
        Ok(Self::new(client, namespace, group_label, groups))
    }

    fn jobs(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn scaled_jobs(&self) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), &self.namespace, &self.scaled_job)
    }

    fn group_of(&self, resource: &impl ResourceExt) -> Option<String> {
        resource_group(resource, &self.group_label, &self.groups)
    }

    fn to_workload(&self, pod: &Pod) -> Option<Workload> {
        let group = self.group_of(pod)?;
        let job = pod
            .labels()
            .get(JOB_NAME_LABEL)
            .cloned()
            .or_else(|| {
                pod.owner_references()
                    .iter()
                    .find(|o| o.kind == "Job")
                    .map(|o| o.name.clone())
            });
        let node = pod.spec.as_ref().and_then(|s| s.node_name.clone());
        let phase = pod
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .map(WorkloadPhase::parse)
            .unwrap_or(WorkloadPhase::Unknown);

        Some(Workload {
            name: pod.name_any(),
            job,
            group,
            node,
            phase,
        })
    }

    async fn delete_pod_names(&self, names: Vec<String>) -> Result<usize, OrchestratorError> {
        let pods = self.pods();
        let mut deleted = 0;
        for name in names {
            match pods.delete(&name, &DeleteParams::background()).await {
                Ok(_) => deleted += 1,
                Err(kube::Error::Api(e)) if e.code == 404 => {}
                Err(e) => return Err(map_err("delete pod", &name, e)),
            }
        }
        Ok(deleted)
    }
}

/// Group of a job or pod: the group label if it names a configured group,
/// otherwise the longest configured name prefix
fn resource_group(
    resource: &impl ResourceExt,
    group_label: &str,
    groups: &[String],
) -> Option<String> {
    if let Some(group) = resource.labels().get(group_label) {
        if groups.contains(group) {
            return Some(group.clone());
        }
    }
    group_from_name(&resource.name_any(), groups).map(str::to_string)
}

fn map_err(operation: &'static str, name: &str, err: kube::Error) -> OrchestratorError {
    match err {
        kube::Error::Api(e) if e.code == 404 => OrchestratorError::NotFound {
            kind: operation,
            name: name.to_string(),
        },
        kube::Error::Api(e) => OrchestratorError::Api {
            operation,
            message: format!("{} ({}): {}", name, e.code, e.message),
        },
        other => OrchestratorError::Transport(other.to_string()),
    }
}

#[async_trait]
impl Orchestrator for KubeOrchestrator {
    async fn list_instances(&self) -> Result<Placement, OrchestratorError> {
        let pods = self
            .pods()
            .list(&ListParams::default())
            .await
            .map_err(|e| map_err("list pods", &self.namespace, e))?;

        let instances = pods
            .items
            .iter()
            .filter_map(|pod| self.to_workload(pod))
            .collect();
        Ok(Placement::new(instances))
    }

    async fn delete_jobs(&self, target: &DeleteTarget) -> Result<usize, OrchestratorError> {
        let jobs = self.jobs();
        let names = match target {
            DeleteTarget::Job { job, .. } => vec![job.clone()],
            DeleteTarget::Group(group) => jobs
                .list(&ListParams::default())
                .await
                .map_err(|e| map_err("list jobs", group, e))?
                .items
                .iter()
                .filter(|j| self.group_of(*j).as_deref() == Some(group.as_str()))
                .map(|j| j.name_any())
                .collect(),
        };

        let mut deleted = 0;
        for name in names {
            match jobs.delete(&name, &DeleteParams::background()).await {
                Ok(_) => deleted += 1,
                Err(kube::Error::Api(e)) if e.code == 404 => {
                    debug!(job = %name, "Job already gone");
                }
                Err(e) => return Err(map_err("delete job", &name, e)),
            }
        }
        Ok(deleted)
    }

    async fn delete_pods(&self, target: &DeleteTarget) -> Result<usize, OrchestratorError> {
        let names: Vec<String> = match target {
            DeleteTarget::Job { job, .. } => {
                let selector = format!("{}={}", JOB_NAME_LABEL, job);
                self.pods()
                    .list(&ListParams::default().labels(&selector))
                    .await
                    .map_err(|e| map_err("list pods", job, e))?
                    .items
                    .iter()
                    .map(|p| p.name_any())
                    .collect()
            }
            DeleteTarget::Group(group) => self
                .pods()
                .list(&ListParams::default())
                .await
                .map_err(|e| map_err("list pods", group, e))?
                .items
                .iter()
                .filter(|p| self.group_of(*p).as_deref() == Some(group.as_str()))
                .map(|p| p.name_any())
                .collect(),
        };

        self.delete_pod_names(names).await
    }

    async fn read_affinity(&self, group: &str) -> Result<Option<NodeAffinity>, OrchestratorError> {
        let scaled_job = self
            .scaled_jobs()
            .get(group)
            .await
            .map_err(|e| map_err("get scaledjob", group, e))?;
        Ok(NodeAffinity::from_scaled_job(&scaled_job.data))
    }

    async fn patch_affinity(
        &self,
        group: &str,
        affinity: &NodeAffinity,
    ) -> Result<(), OrchestratorError> {
        let patch = affinity.to_merge_patch();
        self.scaled_jobs()
            .patch(group, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| map_err("patch scaledjob", group, e))?;
        Ok(())
    }
}
