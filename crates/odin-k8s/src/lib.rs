//! Kubernetes primitives for scheduling odin tasks.
//!
//! Each workload kind the executor can materialize (Pod, Job, Deployment,
//! Service, and the distributed-training custom resources) is wrapped in a
//! [`ResourceHandler`]; the [`TaskManager`] dispatches to the right handler
//! by a task's `resource_type` and presents one uniform lifecycle to the
//! executor: submit, poll status, wait, kill, plus the container-hash probe
//! used by the fingerprint cache.

pub mod error;
pub mod handlers;
pub mod manager;
pub mod pod_spec;

pub use error::{K8sError, K8sResult};
pub use handlers::{HandlerRegistry, ResourceHandler, default_handlers};
pub use manager::{KubernetesTaskManager, TaskManager};

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use serde::{Deserialize, Serialize};

/// Name suffix for the throwaway container-hash probe task.
pub const HASH_TRAILING: &str = "-hash";

/// Pod phases from which a pod will not make further progress.
pub const TERMINAL_PHASES: [&str; 5] = ["Terminated", "Succeeded", "Error", "Failed", "ErrImagePull"];

/// Normalized task status, irrespective of workload kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StatusType {
    Running,
    Succeeded,
    Failed,
    Missing,
}

/// A normalized status plus whatever message the cluster reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Status {
    pub status_type: StatusType,
    pub message: Option<String>,
}

impl Status {
    pub fn new(status_type: StatusType, message: Option<String>) -> Self {
        Self {
            status_type,
            message,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status_type == StatusType::Running
    }
}

/// A Kubernetes event attached to one of our resources.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub reason: Option<String>,
    pub source: String,
    pub message: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

pub(crate) fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .unwrap_or_default()
}

/// Map a pod phase onto the normalized status.
pub(crate) fn status_from_pod(pod: &Pod) -> Status {
    let phase = pod_phase(pod);
    let message = pod.status.as_ref().and_then(|status| status.message.clone());
    if !TERMINAL_PHASES.contains(&phase) {
        return Status::new(StatusType::Running, message);
    }
    if phase == "Succeeded" {
        return Status::new(StatusType::Succeeded, message);
    }
    Status::new(StatusType::Failed, message)
}

/// Aggregate status over the pods of a multi-pod workload: succeeded only
/// when every pod is terminal and at least one succeeded, running while any
/// pod is still going, failed otherwise.
pub(crate) fn aggregate_pod_status(pods: &[Pod]) -> Status {
    if pods.is_empty() {
        return Status::new(StatusType::Missing, Some("no pods found".to_string()));
    }
    let phases: Vec<&str> = pods.iter().map(pod_phase).collect();
    if phases
        .iter()
        .any(|phase| !TERMINAL_PHASES.contains(phase))
    {
        return Status::new(StatusType::Running, None);
    }
    if phases.iter().any(|phase| *phase == "Succeeded") {
        return Status::new(StatusType::Succeeded, None);
    }
    let message = pods
        .iter()
        .find_map(|pod| pod.status.as_ref().and_then(|status| status.message.clone()));
    Status::new(StatusType::Failed, message)
}
