//! Resource handler for batch/v1 Jobs.

use async_trait::async_trait;
use k8s_openapi::api::batch::v1::{Job, JobSpec};
use k8s_openapi::api::core::v1::{Pod, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::PostParams;
use kube::{Api, Client};

use odin_core::task::Task;

use crate::error::K8sResult;
use crate::pod_spec::{generate_config_maps, reference_secrets, task_to_pod_spec};
use crate::{Status, StatusType};

use super::{ResourceHandler, background_delete, json_to_selector, pods_by_selector};

pub struct JobHandler {
    client: Client,
    namespace: String,
}

impl JobHandler {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            client,
            namespace: namespace.to_string(),
        }
    }

    fn api(&self) -> Api<Job> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }
}

#[async_trait]
impl ResourceHandler for JobHandler {
    fn kind(&self) -> &'static str {
        "Job"
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
                name: Some(format!("{}-template", task.name)),
                ..Default::default()
            }),
            spec: Some(task_to_pod_spec(task, None, &secrets, &config_maps)),
        };
        let job = Job {
            metadata: ObjectMeta {
                name: Some(task.name.clone()),
                ..Default::default()
            },
            spec: Some(JobSpec {
                template,
                ..Default::default()
            }),
            ..Default::default()
        };
        self.api().create(&PostParams::default(), &job).await?;
        Ok(task.name.clone())
    }

    async fn status_by_id(&self, resource_id: &str) -> K8sResult<Status> {
        let job = self.api().get(resource_id).await?;
        let status = job.status.unwrap_or_default();
        if status.active.unwrap_or(0) > 0 {
            return Ok(Status::new(StatusType::Running, None));
        }
        if status.failed.unwrap_or(0) > 0 {
            let message = status
                .conditions
                .unwrap_or_default()
                .into_iter()
                .find_map(|condition| condition.message);
            return Ok(Status::new(StatusType::Failed, message));
        }
        Ok(Status::new(StatusType::Succeeded, None))
    }

    async fn get_pods(&self, resource_id: &str) -> K8sResult<Vec<Pod>> {
        let selector = json_to_selector(&[("job-name", resource_id)]);
        pods_by_selector(&self.client, &self.namespace, &selector).await
    }

    async fn kill_by_id(&self, resource_id: &str) -> K8sResult<()> {
        // Background cascade so the job's pods go with it.
        self.api().delete(resource_id, &background_delete()).await?;
        Ok(())
    }
}
