//! Resource handlers: one adapter per Kubernetes workload kind.
//!
//! A handler knows how to submit a task as its kind, poll the resource's
//! status, enumerate the pods behind it, and delete it. Handlers register in
//! a [`HandlerRegistry`] under their canonical kind name plus any aliases;
//! re-registering a name is an error.

pub mod deployment;
pub mod elasticjob;
pub mod job;
pub mod mpijob;
pub mod pod;
pub mod pytorchjob;
pub mod service;
pub mod tfjob;

pub use deployment::DeploymentHandler;
pub use elasticjob::ElasticJobHandler;
pub use job::JobHandler;
pub use mpijob::MpiJobHandler;
pub use pod::PodHandler;
pub use pytorchjob::PyTorchJobHandler;
pub use service::ServiceHandler;
pub use tfjob::TfJobHandler;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Event as CoreEvent, Pod};
use kube::api::{ApiResource, DeleteParams, DynamicObject, ListParams, PostParams, PropagationPolicy};
use kube::{Api, Client};
use serde_json::Value;

use odin_core::task::Task;
use odin_store::{Store, StoreError, fields};

use crate::error::{K8sError, K8sResult};
use crate::{Event, Status};

/// Uniform lifecycle contract over one Kubernetes workload kind.
///
/// The `*_by_id` methods take the kind-specific resource id (for custom
/// resources that is the server-generated name, not the task label); the
/// store-aware entry points resolve a job-store label first and fall back to
/// treating the name as a raw resource id.
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// The canonical Kubernetes kind.
    fn kind(&self) -> &'static str;

    fn client(&self) -> &Client;

    fn namespace(&self) -> &str;

    /// Build the kind-specific manifest for the task and post it, returning
    /// the resource id to poll by.
    async fn submit(&self, task: &Task) -> K8sResult<String>;

    /// Status of the resource with the given id.
    async fn status_by_id(&self, resource_id: &str) -> K8sResult<Status>;

    /// The pods backing the resource, for log retrieval and aggregate status.
    async fn get_pods(&self, resource_id: &str) -> K8sResult<Vec<Pod>>;

    /// Delete the resource with a background cascade.
    async fn kill_by_id(&self, resource_id: &str) -> K8sResult<()>;

    /// Map a job-store label to the resource id recorded at submission.
    async fn resolve_id(&self, name: &str, store: &dyn Store) -> K8sResult<String> {
        match store.get(name).await {
            Ok(record) => Ok(record
                .get(fields::RESOURCE_ID)
                .and_then(Value::as_str)
                .unwrap_or(name)
                .to_string()),
            Err(StoreError::NotFound(_)) => Ok(name.to_string()),
            Err(err) => Err(err.into()),
        }
    }

    async fn status(&self, name: &str, store: &dyn Store) -> K8sResult<Status> {
        let resource_id = self.resolve_id(name, store).await?;
        self.status_by_id(&resource_id).await
    }

    async fn kill(&self, name: &str, store: &dyn Store) -> K8sResult<()> {
        let resource_id = self.resolve_id(name, store).await?;
        self.kill_by_id(&resource_id).await
    }

    /// The cluster events recorded against the resource.
    async fn get_events(&self, name: &str, store: &dyn Store) -> K8sResult<Vec<Event>> {
        let resource_id = self.resolve_id(name, store).await?;
        list_events(self.client(), self.namespace(), self.kind(), &resource_id).await
    }
}

/// Events are listed cluster-wide and narrowed by a field selector on the
/// involved object.
pub(crate) async fn list_events(
    client: &Client,
    namespace: &str,
    kind: &str,
    name: &str,
) -> K8sResult<Vec<Event>> {
    let api = Api::<CoreEvent>::all(client.clone());
    let selector = format!(
        "involvedObject.name={name},involvedObject.namespace={namespace},involvedObject.kind={kind}"
    );
    let events = api.list(&ListParams::default().fields(&selector)).await?;
    Ok(events
        .items
        .into_iter()
        .map(|event| {
            let source = event
                .source
                .map(|source| {
                    [source.component, source.host]
                        .into_iter()
                        .flatten()
                        .collect::<Vec<_>>()
                        .join(",")
                })
                .unwrap_or_default();
            Event {
                type_: event.type_,
                reason: event.reason,
                source,
                message: event.message,
                timestamp: event.last_timestamp.map(|time| time.0),
            }
        })
        .collect())
}

/// Convert label pairs into a Kubernetes label-selector string.
pub(crate) fn json_to_selector(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Delete options for a cascading background delete.
pub(crate) fn background_delete() -> DeleteParams {
    DeleteParams {
        propagation_policy: Some(PropagationPolicy::Background),
        ..Default::default()
    }
}

/// List pods in a namespace by label selector; a missing resource reads as
/// no pods rather than an error.
pub(crate) async fn pods_by_selector(
    client: &Client,
    namespace: &str,
    selector: &str,
) -> K8sResult<Vec<Pod>> {
    let api = Api::<Pod>::namespaced(client.clone(), namespace);
    match api.list(&ListParams::default().labels(selector)).await {
        Ok(pods) => Ok(pods.items),
        Err(kube::Error::Api(_)) => Ok(Vec::new()),
        Err(err) => Err(err.into()),
    }
}

/// Create a custom resource under a `generateName` and hand back the name
/// the server assigned.
pub(crate) async fn create_custom(
    client: &Client,
    namespace: &str,
    resource: &ApiResource,
    generate_name: &str,
    spec: Value,
) -> K8sResult<String> {
    let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, resource);
    let mut object = DynamicObject::new("", resource).data(serde_json::json!({ "spec": spec }));
    object.metadata.name = None;
    object.metadata.generate_name = Some(generate_name.to_string());
    let created = api.create(&PostParams::default(), &object).await?;
    created
        .metadata
        .name
        .ok_or_else(|| K8sError::Submit(format!("no name assigned to `{generate_name}`")))
}

pub(crate) async fn delete_custom(
    client: &Client,
    namespace: &str,
    resource: &ApiResource,
    resource_id: &str,
) -> K8sResult<()> {
    let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, resource);
    api.delete(resource_id, &background_delete()).await?;
    Ok(())
}

/// The registry the task manager dispatches through.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ResourceHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its kind, the lower-cased kind, and any
    /// aliases. A name that is already taken is an error.
    pub fn register(
        &mut self,
        handler: Arc<dyn ResourceHandler>,
        aliases: &[&str],
    ) -> K8sResult<()> {
        let kind = handler.kind();
        let mut names = vec![kind.to_string(), kind.to_lowercase()];
        names.extend(aliases.iter().map(|alias| alias.to_string()));
        names.dedup();
        for name in names {
            if self.handlers.contains_key(&name) {
                return Err(K8sError::DuplicateHandler(name));
            }
            self.handlers.insert(name, handler.clone());
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> K8sResult<Arc<dyn ResourceHandler>> {
        self.handlers
            .get(name)
            .cloned()
            .ok_or_else(|| K8sError::UnknownHandler(name.to_string()))
    }
}

/// Build the registry with every supported workload kind.
pub fn default_handlers(client: Client, namespace: &str) -> K8sResult<HandlerRegistry> {
    let mut registry = HandlerRegistry::new();
    registry.register(Arc::new(PodHandler::new(client.clone(), namespace)), &[])?;
    registry.register(Arc::new(JobHandler::new(client.clone(), namespace)), &[])?;
    registry.register(
        Arc::new(DeploymentHandler::new(client.clone(), namespace)),
        &["deploy"],
    )?;
    registry.register(
        Arc::new(ServiceHandler::new(client.clone(), namespace)),
        &["svc"],
    )?;
    registry.register(
        Arc::new(TfJobHandler::new(client.clone(), namespace)),
        &["tensorflowjob"],
    )?;
    registry.register(
        Arc::new(PyTorchJobHandler::new(client.clone(), namespace)),
        &["pytjob"],
    )?;
    registry.register(Arc::new(MpiJobHandler::new(client.clone(), namespace)), &[])?;
    registry.register(
        Arc::new(ElasticJobHandler::new(client, namespace)),
        &["pytorchelastic"],
    )?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeHandler {
        kind: &'static str,
        client: Client,
    }

    #[async_trait]
    impl ResourceHandler for FakeHandler {
        fn kind(&self) -> &'static str {
            self.kind
        }
        fn client(&self) -> &Client {
            &self.client
        }
        fn namespace(&self) -> &str {
            "default"
        }
        async fn submit(&self, _task: &Task) -> K8sResult<String> {
            unimplemented!()
        }
        async fn status_by_id(&self, _resource_id: &str) -> K8sResult<Status> {
            unimplemented!()
        }
        async fn get_pods(&self, _resource_id: &str) -> K8sResult<Vec<Pod>> {
            unimplemented!()
        }
        async fn kill_by_id(&self, _resource_id: &str) -> K8sResult<()> {
            unimplemented!()
        }
    }

    fn fake_client() -> Client {
        // A client pointed at nothing; these tests never issue requests.
        let config = kube::Config::new("http://127.0.0.1:1".parse().unwrap());
        Client::try_from(config).unwrap()
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let mut registry = HandlerRegistry::new();
        let handler = Arc::new(FakeHandler {
            kind: "Pod",
            client: fake_client(),
        });
        registry.register(handler.clone(), &[]).unwrap();
        let err = registry.register(handler, &[]).unwrap_err();
        assert!(matches!(err, K8sError::DuplicateHandler(_)));
    }

    #[tokio::test]
    async fn duplicate_alias_is_rejected() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(
                Arc::new(FakeHandler {
                    kind: "Pod",
                    client: fake_client(),
                }),
                &["thing"],
            )
            .unwrap();
        let err = registry
            .register(
                Arc::new(FakeHandler {
                    kind: "Job",
                    client: fake_client(),
                }),
                &["thing"],
            )
            .unwrap_err();
        assert!(matches!(err, K8sError::DuplicateHandler(name) if name == "thing"));
    }

    #[tokio::test]
    async fn lookup_by_kind_and_alias() {
        let mut registry = HandlerRegistry::new();
        registry
            .register(
                Arc::new(FakeHandler {
                    kind: "Service",
                    client: fake_client(),
                }),
                &["svc"],
            )
            .unwrap();
        assert!(registry.get("Service").is_ok());
        assert!(registry.get("service").is_ok());
        assert!(registry.get("svc").is_ok());
        assert!(matches!(
            registry.get("TFJob"),
            Err(K8sError::UnknownHandler(_))
        ));
    }

    #[test]
    fn selector_joins_pairs() {
        assert_eq!(
            json_to_selector(&[("tf-job-name", "x"), ("group-name", "kubeflow.org")]),
            "tf-job-name=x, group-name=kubeflow.org"
        );
    }
}
