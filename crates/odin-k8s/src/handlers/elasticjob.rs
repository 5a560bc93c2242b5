//! Resource handler for PyTorch ElasticJobs (elastic.pytorch.org/v1alpha1).

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec, Service};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{ApiResource, ListParams};
use kube::{Api, Client};
use serde_json::json;

use odin_core::task::Task;

use crate::error::{K8sError, K8sResult};
use crate::pod_spec::{generate_config_maps, reference_secrets, task_to_pod_spec};
use crate::{Status, aggregate_pod_status};

use super::{ResourceHandler, create_custom, delete_custom, json_to_selector, pods_by_selector};

const GROUP: &str = "elastic.pytorch.org";
const VERSION: &str = "v1alpha1";
const PLURAL: &str = "elasticjobs";
const CONTAINER: &str = "pytorch-elasticjob";
const GROUP_KEY: &str = "group-name";
// Elastic workers restart on failure exit codes rather than never.
const RESTART_EXIT_CODE: &str = "ExitCode";

const ETCD_ENV: &str = "PYTORCH_ELASTIC_ETCD_SVC";
const ETCD_NAMESPACE: &str = "elastic-job";
const ETCD_SERVICE: &str = "etcd-service";
const ETCD_PORT: u16 = 2379;

fn api_resource() -> ApiResource {
    ApiResource {
        group: GROUP.to_string(),
        version: VERSION.to_string(),
        api_version: format!("{GROUP}/{VERSION}"),
        kind: "ElasticJob".to_string(),
        plural: PLURAL.to_string(),
    }
}

pub struct ElasticJobHandler {
    client: Client,
    namespace: String,
}

impl ElasticJobHandler {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    /// The rendezvous endpoint comes from the environment, or failing that
    /// from the etcd service the elastic operator installs.
    async fn etcd_endpoint(&self) -> K8sResult<String> {
        let host = match std::env::var(ETCD_ENV) {
            Ok(host) => host,
            Err(_) => {
                tracing::warn!(
                    "no {ETCD_ENV} set, looking for {ETCD_SERVICE} in the {ETCD_NAMESPACE} namespace"
                );
                let api = Api::<Service>::namespaced(self.client.clone(), ETCD_NAMESPACE);
                let services = api.list(&ListParams::default()).await?;
                services
                    .items
                    .into_iter()
                    .find(|service| {
                        service.metadata.name.as_deref() == Some(ETCD_SERVICE)
                    })
                    .and_then(|service| service.spec.and_then(|spec| spec.cluster_ip))
                    .ok_or_else(|| {
                        K8sError::Submit(format!(
                            "no {ETCD_SERVICE} found in the {ETCD_NAMESPACE} namespace"
                        ))
                    })?
            }
        };
        tracing::info!(host = %host, port = ETCD_PORT, "using etcd rendezvous service");
        Ok(format!("{host}:{ETCD_PORT}"))
    }
}

#[async_trait]
impl ResourceHandler for ElasticJobHandler {
    fn kind(&self) -> &'static str {
        "ElasticJob"
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
        let spec = json!({
            "replicaSpecs": {
                "Worker": {
                    "replicas": task.num_workers,
                    "restartPolicy": RESTART_EXIT_CODE,
                    "template": serde_json::to_value(&template).expect("template serializes"),
                },
            },
            "minReplicas": task.num_workers,
            "maxReplicas": task.num_workers,
            "rdzvEndpoint": self.etcd_endpoint().await?,
        });
        create_custom(&self.client, &self.namespace, &api_resource(), &task.name, spec).await
    }

    async fn status_by_id(&self, resource_id: &str) -> K8sResult<Status> {
        let pods = self.get_pods(resource_id).await?;
        Ok(aggregate_pod_status(&pods))
    }

    async fn get_pods(&self, resource_id: &str) -> K8sResult<Vec<Pod>> {
        // The operator labels pods with the group only, so narrow by name.
        let selector = json_to_selector(&[(GROUP_KEY, GROUP)]);
        let pods = pods_by_selector(&self.client, &self.namespace, &selector).await?;
        Ok(pods
            .into_iter()
            .filter(|pod| {
                pod.metadata
                    .name
                    .as_deref()
                    .is_some_and(|name| name.starts_with(resource_id))
            })
            .collect())
    }

    async fn kill_by_id(&self, resource_id: &str) -> K8sResult<()> {
        delete_custom(&self.client, &self.namespace, &api_resource(), resource_id).await
    }
}
