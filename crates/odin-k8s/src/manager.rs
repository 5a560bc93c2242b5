//! The task manager: one uniform interface over every workload kind.

use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use futures::{AsyncBufReadExt, StreamExt};
use k8s_openapi::api::core::v1::{ContainerStatus, Pod};
use kube::api::LogParams;
use kube::{Api, Client};
use regex::Regex;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::sleep;

use odin_core::task::Task;
use odin_store::{Store, StoreError, fields};

use crate::error::{K8sError, K8sResult};
use crate::handlers::{HandlerRegistry, ResourceHandler, default_handlers};
use crate::{Event, HASH_TRAILING, Status, StatusType, pod_phase};

/// Floor for status polling; nothing in the manager polls tighter than this.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

static IMAGE_DIGEST: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@sha256:(.*)$").unwrap());

/// What the executor needs from a scheduler: submit, poll, wait, kill, and
/// the container-hash probe. Kept narrow so tests can script completions.
#[async_trait]
pub trait TaskManager: Send + Sync {
    /// Dispatch the task to its kind's handler. Failures to schedule are
    /// reported as [`K8sError::Submit`].
    async fn submit(&self, task: &Task) -> K8sResult<String>;

    /// Normalized status of the resource recorded under a store label.
    async fn status(&self, handle: &str) -> K8sResult<Status>;

    /// Suspend until the task's status leaves `RUNNING`, polling at
    /// [`POLL_INTERVAL`]. Returns the terminal status.
    async fn wait_for(&self, task: &Task) -> K8sResult<Status>;

    /// Kill the resource recorded under a store label.
    async fn kill(&self, handle: &str) -> K8sResult<()>;

    /// Content-addressable digests of the task's container image(s),
    /// obtained by running a short-lived probe copy of the task.
    async fn hash_task(&self, task: &Task) -> K8sResult<Vec<String>>;
}

/// [`TaskManager`] implementation that schedules on Kubernetes.
pub struct KubernetesTaskManager {
    client: Client,
    namespace: String,
    store: Arc<dyn Store>,
    handlers: HandlerRegistry,
}

impl KubernetesTaskManager {
    /// Connect with the ambient cluster configuration.
    pub async fn new(store: Arc<dyn Store>, namespace: &str) -> K8sResult<Self> {
        let client = Client::try_default().await?;
        Self::with_client(client, store, namespace)
    }

    pub fn with_client(
        client: Client,
        store: Arc<dyn Store>,
        namespace: &str,
    ) -> K8sResult<Self> {
        let handlers = default_handlers(client.clone(), namespace)?;
        Ok(Self {
            client,
            namespace: namespace.to_string(),
            store,
            handlers,
        })
    }

    pub fn handler_for(&self, resource_type: &str) -> K8sResult<Arc<dyn ResourceHandler>> {
        self.handlers.get(resource_type)
    }

    /// The resource type recorded for a store label; bare pods otherwise.
    async fn resource_type(&self, handle: &str) -> String {
        match self.store.get(handle).await {
            Ok(record) => record
                .get(fields::RESOURCE_TYPE)
                .and_then(Value::as_str)
                .unwrap_or("Pod")
                .to_string(),
            Err(_) => "Pod".to_string(),
        }
    }

    /// Resolve a user-visible name to `(resource_type, resource_id)` pairs.
    ///
    /// `svc/name` and `deploy/name` address those kinds directly. A pipeline
    /// label expands to all of its children. Names missing from the store
    /// are assumed to be raw pod names so logs work for anything on the
    /// cluster.
    async fn find_resources(&self, name: &str) -> K8sResult<Vec<(String, String)>> {
        if let Some((prefix, resource)) = name.split_once('/') {
            match prefix.to_lowercase().as_str() {
                "svc" | "service" => return Ok(vec![("svc".to_string(), resource.to_string())]),
                "deploy" | "deployment" => {
                    return Ok(vec![("deploy".to_string(), resource.to_string())]);
                }
                _ => {}
            }
        }

        let record = match self.store.get(name).await {
            Ok(record) => record,
            Err(StoreError::NotFound(_)) => {
                return Ok(vec![("Pod".to_string(), name.to_string())]);
            }
            Err(err) => return Err(err.into()),
        };

        let is_pipeline = record.get(fields::PARENT).is_none_or(Value::is_null);
        if is_pipeline {
            let mut resources = Vec::new();
            for set in [fields::WAITING, fields::EXECUTING, fields::EXECUTED] {
                let Some(children) = record.get(set).and_then(Value::as_array) else {
                    continue;
                };
                for child in children.iter().filter_map(Value::as_str) {
                    let entry = self.store.get(child).await?;
                    if let Some(resource_id) =
                        entry.get(fields::RESOURCE_ID).and_then(Value::as_str)
                    {
                        resources.push((
                            entry
                                .get(fields::RESOURCE_TYPE)
                                .and_then(Value::as_str)
                                .unwrap_or("Pod")
                                .to_string(),
                            resource_id.to_string(),
                        ));
                    }
                }
            }
            return Ok(resources);
        }

        let resource_id = record
            .get(fields::RESOURCE_ID)
            .and_then(Value::as_str)
            .unwrap_or(name)
            .to_string();
        let resource_type = record
            .get(fields::RESOURCE_TYPE)
            .and_then(Value::as_str)
            .unwrap_or("Pod")
            .to_string();
        Ok(vec![(resource_type, resource_id)])
    }

    /// The pod names a user-visible name resolves to.
    pub async fn find_resource_names(&self, name: &str) -> K8sResult<Vec<String>> {
        let mut pods = Vec::new();
        for (resource_type, resource_id) in self.find_resources(name).await? {
            let handler = self.handler_for(&resource_type)?;
            for pod in handler.get_pods(&resource_id).await? {
                if let Some(pod_name) = pod.metadata.name {
                    pods.push(pod_name);
                }
            }
        }
        Ok(pods)
    }

    /// A snapshot of the logs of every pod behind `name`.
    pub async fn get_logs(
        &self,
        name: &str,
        container: Option<String>,
        lines: Option<i64>,
    ) -> K8sResult<String> {
        let mut pods = self.find_resource_names(name).await?;
        let mut all_logs = Vec::new();
        if pods.len() > 1 {
            let mut preamble = vec![format!("Found {} pods,", pods.len())];
            preamble.extend(pods.iter().cloned());
            preamble.push(format!("using pod/{}", pods[0]));
            all_logs.push(preamble.join("\n"));
        }
        if pods.is_empty() {
            pods.push(name.to_string());
        }

        let api = Api::<Pod>::namespaced(self.client.clone(), &self.namespace);
        let params = LogParams {
            container: container.clone(),
            tail_lines: lines,
            ..Default::default()
        };
        for pod in &pods {
            let logs = api.logs(pod, &params).await?;
            all_logs.push(format!("{}\n{pod}\n{}\n{logs}", "=".repeat(16), "-".repeat(16)));
        }
        Ok(all_logs.join("\n"))
    }

    /// Follow the logs of the first pod behind `name`.
    ///
    /// An I/O worker reads log chunks from the cluster and feeds a channel;
    /// when the receiving side goes away the worker notices on its next
    /// send and stops.
    pub async fn follow_logs(
        &self,
        name: &str,
        container: Option<String>,
        lines: Option<i64>,
    ) -> K8sResult<mpsc::Receiver<String>> {
        let pods = self.find_resource_names(name).await?;
        let mut preamble = Vec::new();
        if pods.len() > 1 {
            preamble.push(format!("Found {} pods,", pods.len()));
            preamble.extend(pods.iter().cloned());
            preamble.push(format!("Using pod/{}", pods[0]));
        }
        let pod = pods.first().cloned().unwrap_or_else(|| name.to_string());

        let api = Api::<Pod>::namespaced(self.client.clone(), &self.namespace);
        let params = LogParams {
            follow: true,
            container,
            tail_lines: lines,
            ..Default::default()
        };
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            for line in preamble {
                if tx.send(line).await.is_err() {
                    return;
                }
            }
            let reader = match api.log_stream(&pod, &params).await {
                Ok(reader) => reader,
                Err(err) => {
                    let _ = tx.send(format!("error streaming logs: {err}")).await;
                    return;
                }
            };
            let mut lines = reader.lines();
            while let Some(line) = lines.next().await {
                match line {
                    Ok(line) => {
                        if tx.send(line).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        tracing::debug!(pod = %pod, error = %err, "log stream ended");
                        break;
                    }
                }
            }
        });
        Ok(rx)
    }

    /// The cluster events for every resource behind `name`.
    pub async fn get_events(&self, name: &str) -> K8sResult<Vec<Event>> {
        let mut all_events = Vec::new();
        for (resource_type, resource_id) in self.find_resources(name).await? {
            let handler = self.handler_for(&resource_type)?;
            all_events.extend(
                handler
                    .get_events(&resource_id, self.store.as_ref())
                    .await?,
            );
        }
        Ok(all_events)
    }

    /// Suspend until every pod behind the resource reports phase `Running`.
    /// The container digests are not available while pods sit in `Pending`.
    pub async fn wait_until_running(
        &self,
        handler: &Arc<dyn ResourceHandler>,
        resource_id: &str,
    ) -> K8sResult<()> {
        loop {
            let pods = handler.get_pods(resource_id).await?;
            if !pods.is_empty() && pods.iter().all(|pod| pod_phase(pod) == "Running") {
                return Ok(());
            }
            sleep(POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl TaskManager for KubernetesTaskManager {
    async fn submit(&self, task: &Task) -> K8sResult<String> {
        let handler = self.handler_for(task.resource_type.as_str())?;
        handler
            .submit(task)
            .await
            .map_err(|err| K8sError::Submit(err.to_string()))
    }

    async fn status(&self, handle: &str) -> K8sResult<Status> {
        let resource_type = self.resource_type(handle).await;
        let handler = self.handler_for(&resource_type)?;
        match handler.status(handle, self.store.as_ref()).await {
            Ok(status) => Ok(status),
            Err(K8sError::Api(kube::Error::Api(_))) => Ok(Status::new(
                StatusType::Missing,
                Some("resource not found".to_string()),
            )),
            Err(err) => Err(err),
        }
    }

    async fn wait_for(&self, task: &Task) -> K8sResult<Status> {
        loop {
            let status = self.status(&task.name).await?;
            if !status.is_running() {
                return Ok(status);
            }
            sleep(POLL_INTERVAL).await;
        }
    }

    async fn kill(&self, handle: &str) -> K8sResult<()> {
        let resource_type = self.resource_type(handle).await;
        let handler = self.handler_for(&resource_type)?;
        handler.kill(handle, self.store.as_ref()).await
    }

    /// Hash a task's containers without running the real job.
    ///
    /// A copy of the task is submitted with a `-hash` name suffix and its
    /// command replaced by a short sleep, with GPUs, node selectors, and
    /// mounts cleared so it schedules immediately. Once the probe is
    /// running, the pods' container statuses carry the image digests; the
    /// probe is then killed.
    async fn hash_task(&self, task: &Task) -> K8sResult<Vec<String>> {
        let mut probe = task.clone();
        probe.name = format!("{}{HASH_TRAILING}", task.name);
        probe.command = vec!["sleep".to_string()];
        probe.args = vec!["300".to_string()];
        probe.node_selector = None;
        probe.num_gpus = 0;
        probe.mounts.clear();

        let handler = self.handler_for(probe.resource_type.as_str())?;
        let resource_id = handler
            .submit(&probe)
            .await
            .map_err(|err| K8sError::Submit(err.to_string()))?;
        self.wait_until_running(&handler, &resource_id).await?;

        let pods = handler.get_pods(&resource_id).await?;
        let mut statuses: Vec<ContainerStatus> = pods
            .into_iter()
            .filter_map(|pod| pod.status)
            .filter_map(|status| status.container_statuses)
            .flatten()
            .collect();
        statuses.sort_by(|a, b| a.image.cmp(&b.image));
        let hashes = statuses
            .iter()
            .filter_map(|status| IMAGE_DIGEST.captures(&status.image_id))
            .map(|captures| captures[1].to_string())
            .collect();

        handler.kill_by_id(&resource_id).await?;
        Ok(hashes)
    }
}
