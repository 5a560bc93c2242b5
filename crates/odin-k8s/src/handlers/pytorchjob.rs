//! Resource handler for multi-worker PyTorchJobs (kubeflow.org/v1).

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::ApiResource;
use kube::Client;
use serde_json::json;

use odin_core::task::Task;

use crate::error::K8sResult;
use crate::pod_spec::{RESTART_NEVER, generate_config_maps, reference_secrets, task_to_pod_spec};
use crate::{Status, aggregate_pod_status};

use super::{ResourceHandler, create_custom, delete_custom, json_to_selector, pods_by_selector};

const GROUP: &str = "kubeflow.org";
const VERSION: &str = "v1";
const PLURAL: &str = "pytorchjobs";
const CONTAINER: &str = "pytorch";
// The operator switched label formats; we use the new one.
const SELECTOR: &str = "pytorch-job-name";
const GROUP_KEY: &str = "group-name";

fn api_resource() -> ApiResource {
    ApiResource {
        group: GROUP.to_string(),
        version: VERSION.to_string(),
        api_version: format!("{GROUP}/{VERSION}"),
        kind: "PyTorchJob".to_string(),
        plural: PLURAL.to_string(),
    }
}

pub struct PyTorchJobHandler {
    client: Client,
    namespace: String,
}

impl PyTorchJobHandler {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl ResourceHandler for PyTorchJobHandler {
    fn kind(&self) -> &'static str {
        "PyTorchJob"
    }

    fn client(&self) -> &Client {
        &self.client
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn submit(&self, task: &Task) -> K8sResult<String> {
        let secrets = reference_secrets(&self.client, &self.namespace, task).await;
        let config_maps = generate_config_maps(&self.client, &self.namespace, task).await;
        let template = PodTemplateSpec {
            metadata: Some(ObjectMeta {
                name: Some(task.name.clone()),
                ..Default::default()
            }),
            spec: Some(task_to_pod_spec(task, Some(CONTAINER), &secrets, &config_maps)),
        };
        let template = serde_json::to_value(&template).expect("template serializes");
        let spec = json!({
            "pytorchReplicaSpecs": {
                "Master": {
                    "replicas": 1,
                    "restartPolicy": RESTART_NEVER,
                    "template": template.clone(),
                },
                "Worker": {
                    "replicas": task.num_workers,
                    "restartPolicy": RESTART_NEVER,
                    "template": template,
                },
            },
        });
        create_custom(&self.client, &self.namespace, &api_resource(), &task.name, spec).await
    }

    async fn status_by_id(&self, resource_id: &str) -> K8sResult<Status> {
        let pods = self.get_pods(resource_id).await?;
        Ok(aggregate_pod_status(&pods))
    }

    async fn get_pods(&self, resource_id: &str) -> K8sResult<Vec<Pod>> {
        let selector = json_to_selector(&[(SELECTOR, resource_id), (GROUP_KEY, GROUP)]);
        pods_by_selector(&self.client, &self.namespace, &selector).await
    }

    async fn kill_by_id(&self, resource_id: &str) -> K8sResult<()> {
        delete_custom(&self.client, &self.namespace, &api_resource(), resource_id).await
    }
}
