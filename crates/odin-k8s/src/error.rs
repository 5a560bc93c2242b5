//! Errors surfaced by the Kubernetes layer.

use thiserror::Error;

use odin_store::StoreError;

#[derive(Debug, Error)]
pub enum K8sError {
    /// A task could not be scheduled onto the cluster.
    #[error("failed to submit task: {0}")]
    Submit(String),

    #[error("kubernetes api error: {0}")]
    Api(#[from] kube::Error),

    #[error("no resource handler registered for `{0}`")]
    UnknownHandler(String),

    #[error("attempt to re-register resource handler `{0}`")]
    DuplicateHandler(String),

    #[error("resource kind `{0}` cannot be submitted by a pipeline")]
    UnsupportedResource(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type K8sResult<T> = std::result::Result<T, K8sError>;
