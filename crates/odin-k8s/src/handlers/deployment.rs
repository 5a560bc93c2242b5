//! Resource handler for Deployments.
//!
//! Deployments are created out-of-band; pipelines only need to find their
//! pods, read their events, and tear them down during cleanup.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};

use odin_core::task::Task;

use crate::error::{K8sError, K8sResult};
use crate::Status;

use super::{ResourceHandler, background_delete, pods_by_selector};

pub struct DeploymentHandler {
    client: Client,
    namespace: String,
}

impl DeploymentHandler {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    fn api(&self) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl ResourceHandler for DeploymentHandler {
    fn kind(&self) -> &'static str {
        "Deployment"
    }

    fn client(&self) -> &Client {
        &self.client
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn submit(&self, _task: &Task) -> K8sResult<String> {
        Err(K8sError::UnsupportedResource("Deployment"))
    }

    async fn status_by_id(&self, _resource_id: &str) -> K8sResult<Status> {
        Err(K8sError::UnsupportedResource("Deployment"))
    }

    async fn get_pods(&self, resource_id: &str) -> K8sResult<Vec<Pod>> {
        let scale = match self.api().get_scale(resource_id).await {
            Ok(scale) => scale,
            Err(kube::Error::Api(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let Some(selector) = scale.status.and_then(|status| status.selector) else {
            return Ok(Vec::new());
        };
        pods_by_selector(&self.client, &self.namespace, &selector).await
    }

    async fn kill_by_id(&self, resource_id: &str) -> K8sResult<()> {
        self.api().delete(resource_id, &background_delete()).await?;
        Ok(())
    }
}
