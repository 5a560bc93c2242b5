//! Resource handler for Services.
//!
//! Like deployments, services exist so users can point log and event
//! queries at them; they are not submitted by pipelines.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use kube::{Api, Client};

use odin_core::task::Task;

use crate::error::{K8sError, K8sResult};
use crate::Status;

use super::{ResourceHandler, background_delete, json_to_selector, pods_by_selector};

pub struct ServiceHandler {
    client: Client,
    namespace: String,
}

impl ServiceHandler {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    fn api(&self) -> Api<Service> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl ResourceHandler for ServiceHandler {
    fn kind(&self) -> &'static str {
        "Service"
    }

    fn client(&self) -> &Client {
        &self.client
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn submit(&self, _task: &Task) -> K8sResult<String> {
        Err(K8sError::UnsupportedResource("Service"))
    }

    async fn status_by_id(&self, _resource_id: &str) -> K8sResult<Status> {
        Err(K8sError::UnsupportedResource("Service"))
    }

    async fn get_pods(&self, resource_id: &str) -> K8sResult<Vec<Pod>> {
        let service = match self.api().get(resource_id).await {
            Ok(service) => service,
            Err(kube::Error::Api(_)) => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let Some(selector) = service.spec.and_then(|spec| spec.selector) else {
            return Ok(Vec::new());
        };
        let pairs: Vec<(&str, &str)> = selector
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
            .collect();
        pods_by_selector(&self.client, &self.namespace, &json_to_selector(&pairs)).await
    }

    async fn kill_by_id(&self, resource_id: &str) -> K8sResult<()> {
        self.api().delete(resource_id, &background_delete()).await?;
        Ok(())
    }
}
