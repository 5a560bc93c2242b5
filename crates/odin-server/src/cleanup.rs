//! The CLEANUP command: tear a pipeline down from the cluster, and
//! optionally purge its records and its run directory.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

use odin_k8s::{KubernetesTaskManager, TaskManager};
use odin_store::{Store, fields};

/// One row of the cleanup report. The values are the literal strings
/// `"Yes"` and `"No"`, which is what the clients render.
#[derive(Debug, Serialize)]
pub struct Cleaned {
    pub task_id: String,
    pub cleaned_from_k8s: String,
    pub purged_from_db: String,
    pub removed_from_fs: String,
}

fn done(label: &str, completed: &HashSet<String>) -> String {
    if completed.contains(label) { "Yes" } else { "No" }.to_string()
}

/// Clean up one pipeline.
///
/// Kills every child that made it to the cluster; with `purge_db` the
/// records go too, the parent last so a partial failure leaves it findable;
/// with `purge_fs` the entire run directory is removed.
pub async fn cleanup(
    work: &str,
    store: &dyn Store,
    manager: &KubernetesTaskManager,
    purge_db: bool,
    purge_fs: bool,
    data_dir: &Path,
) -> anyhow::Result<Vec<Cleaned>> {
    if work.is_empty() {
        return Ok(Vec::new());
    }
    let parent = store.get(work).await?;
    let mut children: Vec<String> = Vec::new();
    for set in [fields::EXECUTED, fields::EXECUTING] {
        if let Some(labels) = parent.get(set).and_then(Value::as_array) {
            children.extend(labels.iter().filter_map(Value::as_str).map(str::to_string));
        }
    }

    let mut cleaned = HashSet::new();
    let mut purged = HashSet::new();
    let mut removed = HashSet::new();

    if purge_fs {
        let run_dir = data_dir.join(work);
        if let Err(err) = std::fs::remove_dir_all(&run_dir) {
            tracing::warn!(path = %run_dir.display(), error = %err, "could not remove run directory");
        } else {
            removed.insert(work.to_string());
            removed.extend(children.iter().cloned());
        }
    }

    for child in &children {
        match manager.kill(child).await {
            Ok(()) => {
                cleaned.insert(child.clone());
            }
            Err(err) => {
                tracing::debug!(task = %child, error = %err, "not killed");
            }
        }
        if purge_db && store.remove(child).await? {
            purged.insert(child.clone());
        }
    }
    // Remove the parent entry last so an earlier failure leaves it usable.
    if purge_db && store.remove(work).await? {
        purged.insert(work.to_string());
    }

    let mut report = vec![work.to_string()];
    report.extend(children);
    Ok(report
        .into_iter()
        .map(|label| Cleaned {
            task_id: label.clone(),
            cleaned_from_k8s: done(&label, &cleaned),
            purged_from_db: done(&label, &purged),
            removed_from_fs: done(&label, &removed),
        })
        .collect())
}
