//! Shared server state, threaded through every command handler.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use odin_k8s::KubernetesTaskManager;
use odin_store::{Cache, Store};

/// External collaborator that renders pipeline definitions from generator
/// options. Generation itself lives outside the execution core.
#[async_trait]
pub trait PipelineGenerator: Send + Sync {
    async fn generate(&self, root_path: &Path, options: Value) -> anyhow::Result<String>;
}

/// Everything a connection needs to serve commands.
pub struct ServerContext {
    pub store: Arc<dyn Store>,
    pub cache: Arc<dyn Cache>,
    pub manager: Arc<KubernetesTaskManager>,
    pub root_path: PathBuf,
    pub data_path: PathBuf,
    pub generator: Option<Arc<dyn PipelineGenerator>>,
}

/// Revision of the pipeline template repository, recorded per run when the
/// root path is a git checkout.
pub fn current_revision(root: &Path) -> Option<String> {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(root)
        .output()
        .ok()?;
    if !output.status.success() {
        tracing::warn!("failed to get revision version");
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
