//! The STATUS command: one pipeline summary plus a row per task.

use serde::Serialize;
use serde_json::Value;

use odin_store::{Store, StoreError, fields};

#[derive(Debug, Serialize)]
pub struct PipelineSummary {
    pub label: String,
    pub job: Value,
    pub version: Value,
    pub status: Value,
    pub submitted: Value,
    pub completed: Value,
}

#[derive(Debug, Serialize)]
pub struct TaskRow {
    pub task: String,
    pub status: String,
    pub command: Value,
    pub name: Value,
    pub image: Value,
    pub resource_type: Value,
    pub resource_id: Value,
    pub submitted: Value,
    pub completed: Value,
}

fn field(record: &Value, name: &str) -> Value {
    record.get(name).cloned().unwrap_or(Value::Null)
}

async fn rows_for(
    store: &dyn Store,
    labels: &[String],
    status: &str,
) -> Result<Vec<TaskRow>, StoreError> {
    let mut rows = Vec::new();
    for label in labels {
        let record = store.get(label).await?;
        rows.push(TaskRow {
            task: label.clone(),
            status: status.to_string(),
            command: field(&record, "command"),
            name: field(&record, fields::NAME),
            image: field(&record, "image"),
            resource_type: field(&record, fields::RESOURCE_TYPE),
            resource_id: field(&record, fields::RESOURCE_ID),
            submitted: field(&record, fields::SUBMIT_TIME),
            completed: field(&record, fields::COMPLETION_TIME),
        });
    }
    Ok(rows)
}

fn labels_of(record: &Value, set: &str) -> Vec<String> {
    record
        .get(set)
        .and_then(Value::as_array)
        .map(|labels| {
            labels
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Summarize one pipeline and each of its tasks.
pub async fn get_status(
    label: &str,
    store: &dyn Store,
) -> Result<(PipelineSummary, Vec<TaskRow>), StoreError> {
    let record = store.get(label).await?;
    let status = field(&record, fields::STATUS);
    let pipe = PipelineSummary {
        label: label.to_string(),
        job: field(&record, fields::JOB_NAME),
        version: field(&record, fields::VERSION),
        status: status.clone(),
        submitted: field(&record, fields::SUBMIT_TIME),
        completed: field(&record, fields::COMPLETION_TIME),
    };

    let mut rows = rows_for(store, &labels_of(&record, fields::EXECUTED), "executed").await?;
    // Tasks stuck executing when a pipeline is torn down read as terminated.
    let executing_status = if status == "TERMINATED" {
        "terminated"
    } else {
        "executing"
    };
    rows.extend(rows_for(store, &labels_of(&record, fields::EXECUTING), executing_status).await?);
    rows.extend(rows_for(store, &labels_of(&record, fields::WAITING), "waiting").await?);
    Ok((pipe, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use odin_store::MemoryStore;
    use serde_json::json;

    #[tokio::test]
    async fn status_rows_cover_all_three_sets() {
        let store = MemoryStore::new();
        store
            .set(json!({
                "label": "p-xj",
                "job_name": "p",
                "status": "TERMINATED",
                "executed": ["p-xj--a"],
                "executing": ["p-xj--b"],
                "waiting": ["p-xj--c"],
            }))
            .await
            .unwrap();
        for name in ["a", "b", "c"] {
            store
                .set(json!({
                    "label": format!("p-xj--{name}"),
                    "parent": "p-xj",
                    "name": name,
                    "command": ["run"],
                    "image": "img",
                    "resource_type": "Pod",
                }))
                .await
                .unwrap();
        }

        let (pipe, rows) = get_status("p-xj", &store).await.unwrap();
        assert_eq!(pipe.status, json!("TERMINATED"));
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].status, "executed");
        assert_eq!(rows[1].status, "terminated");
        assert_eq!(rows[2].status, "waiting");
    }
}
