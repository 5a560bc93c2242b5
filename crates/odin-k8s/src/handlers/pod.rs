//! Resource handler for bare Pods.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};

use odin_core::task::Task;

use crate::error::K8sResult;
use crate::pod_spec::{generate_config_maps, reference_secrets, task_to_pod_spec};
use crate::{Status, status_from_pod};

use super::ResourceHandler;

pub struct PodHandler {
    client: Client,
    namespace: String,
}

impl PodHandler {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    fn api(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl ResourceHandler for PodHandler {
    fn kind(&self) -> &'static str {
        "Pod"
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
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(task.name.clone()),
                ..Default::default()
            },
            spec: Some(task_to_pod_spec(task, None, &secrets, &config_maps)),
            ..Default::default()
        };
        self.api().create(&PostParams::default(), &pod).await?;
        Ok(task.name.clone())
    }

    async fn status_by_id(&self, resource_id: &str) -> K8sResult<Status> {
        let pod = self.api().get(resource_id).await?;
        Ok(status_from_pod(&pod))
    }

    async fn get_pods(&self, resource_id: &str) -> K8sResult<Vec<Pod>> {
        match self.api().get(resource_id).await {
            Ok(pod) => Ok(vec![pod]),
            Err(kube::Error::Api(_)) => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn kill_by_id(&self, resource_id: &str) -> K8sResult<()> {
        self.api()
            .delete(resource_id, &DeleteParams::default())
            .await?;
        Ok(())
    }
}
