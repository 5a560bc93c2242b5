//! Task definitions.
//!
//! A [`Task`] is the declarative unit of work in a pipeline. It carries
//! enough information to be materialized as one Kubernetes workload of the
//! kind named by its [`ResourceKind`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// The Kubernetes workload kinds a task can materialize as.
///
/// Serialized under the canonical kind names; the common shorthand spellings
/// used in pipeline files are accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ResourceKind {
    #[default]
    #[serde(alias = "pod")]
    Pod,
    #[serde(alias = "job")]
    Job,
    #[serde(alias = "deployment", alias = "deploy")]
    Deployment,
    #[serde(alias = "service", alias = "svc")]
    Service,
    #[serde(rename = "TFJob", alias = "tfjob", alias = "tensorflowjob")]
    TfJob,
    #[serde(rename = "PyTorchJob", alias = "pytorchjob", alias = "pytjob")]
    PyTorchJob,
    #[serde(rename = "MPIJob", alias = "mpijob")]
    MpiJob,
    #[serde(rename = "ElasticJob", alias = "elasticjob", alias = "pytorchelastic")]
    ElasticJob,
}

impl ResourceKind {
    /// The canonical Kubernetes kind string.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "Pod",
            ResourceKind::Job => "Job",
            ResourceKind::Deployment => "Deployment",
            ResourceKind::Service => "Service",
            ResourceKind::TfJob => "TFJob",
            ResourceKind::PyTorchJob => "PyTorchJob",
            ResourceKind::MpiJob => "MPIJob",
            ResourceKind::ElasticJob => "ElasticJob",
        }
    }

    /// Kinds that fan one logical task out over several pods.
    pub fn is_multi_pod(&self) -> bool {
        matches!(
            self,
            ResourceKind::TfJob
                | ResourceKind::PyTorchJob
                | ResourceKind::MpiJob
                | ResourceKind::ElasticJob
        )
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persistent-volume-claim mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeRef {
    /// Volume name.
    pub name: String,
    /// Mount path inside the container.
    pub path: String,
    /// Name of the persistent volume claim backing the volume.
    pub claim: String,
}

/// A secret mount. Well-known secrets get their path, sub-path, and mode
/// filled in by the resource handlers when left unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRef {
    /// Secret name.
    pub name: String,
    /// Mount path inside the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Key of the secret to project at the mount path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    /// Mode bits for the projected file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<i32>,
}

/// A config-map mount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMapRef {
    /// Config-map name.
    pub name: String,
    /// Mount path inside the container.
    pub path: String,
    /// Key of the config map to project at the mount path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
}

/// CPU limit and request, passed through to the container spec verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CpuRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limits: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requests: Option<String>,
}

/// Pod-level security context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs_group: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_group: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_as_user: Option<i64>,
}

fn default_pull_policy() -> String {
    "IfNotPresent".to_string()
}

fn default_num_workers() -> u32 {
    1
}

/// One node of a pipeline DAG.
///
/// In a pipeline file the `name` is the task-local name; before submission
/// the executor rewrites it to the globally unique child label
/// `<pipeline>--<name>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task name, unique within the pipeline. Must not contain `.`.
    pub name: String,
    /// Container image to run.
    pub image: String,
    /// Command to execute in the container.
    #[serde(default)]
    pub command: Vec<String>,
    /// Arguments to the command. May contain `^` references.
    #[serde(default)]
    pub args: Vec<String>,
    /// Which Kubernetes workload kind to materialize as.
    #[serde(default)]
    pub resource_type: ResourceKind,
    /// GPUs requested for this task.
    #[serde(default)]
    pub num_gpus: u32,
    /// Worker replicas for distributed-training kinds.
    #[serde(default = "default_num_workers")]
    pub num_workers: u32,
    /// Node-selector labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<HashMap<String, String>>,
    /// Persistent-volume-claim mounts.
    #[serde(default, alias = "mount", skip_serializing_if = "Vec::is_empty")]
    pub mounts: Vec<VolumeRef>,
    /// Secret mounts.
    #[serde(default, alias = "secret", skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretRef>,
    /// Config-map mounts.
    #[serde(default, alias = "config_map", skip_serializing_if = "Vec::is_empty")]
    pub config_maps: Vec<ConfigMapRef>,
    /// CPU limit and request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuRequest>,
    /// Pod security context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
    /// Image pull policy.
    #[serde(default = "default_pull_policy")]
    pub pull_policy: String,
    /// Declared input paths, hashed into the task's input fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inputs: Option<Vec<String>>,
    /// Declared output paths; a task with outputs participates in caching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<String>>,
    /// Explicit dependencies, by task-local name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_task_from_json() {
        let task: Task = serde_json::from_value(serde_json::json!({
            "name": "train",
            "image": "example.com/trainer:latest",
        }))
        .unwrap();
        assert_eq!(task.resource_type, ResourceKind::Pod);
        assert_eq!(task.num_workers, 1);
        assert_eq!(task.pull_policy, "IfNotPresent");
        assert!(task.args.is_empty());
    }

    #[test]
    fn resource_kind_aliases() {
        let kind: ResourceKind = serde_json::from_value(serde_json::json!("pytjob")).unwrap();
        assert_eq!(kind, ResourceKind::PyTorchJob);
        let kind: ResourceKind = serde_json::from_value(serde_json::json!("TFJob")).unwrap();
        assert_eq!(kind, ResourceKind::TfJob);
        assert_eq!(
            serde_json::to_value(ResourceKind::ElasticJob).unwrap(),
            serde_json::json!("ElasticJob")
        );
    }

    #[test]
    fn singular_mount_alias() {
        let task: Task = serde_json::from_value(serde_json::json!({
            "name": "train",
            "image": "img",
            "mount": [{"name": "data", "path": "/data", "claim": "data-claim"}],
        }))
        .unwrap();
        assert_eq!(task.mounts.len(), 1);
        assert_eq!(task.mounts[0].claim, "data-claim");
    }
}
