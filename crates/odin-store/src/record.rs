//! Typed views over the JSON records held by the job store.
//!
//! The store itself deals in raw JSON objects; these wrappers give the
//! executor and the gateway a typed surface while round-tripping any extra
//! fields a running task may have written into its own record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use odin_core::ResourceKind;

/// Record field names shared between backends and callers.
pub mod fields {
    pub const LABEL: &str = "label";
    pub const PARENT: &str = "parent";
    pub const NAME: &str = "name";
    pub const JOB_NAME: &str = "job_name";
    pub const VERSION: &str = "version";
    pub const STATUS: &str = "status";
    pub const JOBS: &str = "jobs";
    pub const EXECUTED: &str = "executed";
    pub const EXECUTING: &str = "executing";
    pub const WAITING: &str = "waiting";
    pub const SUBMIT_TIME: &str = "submit_time";
    pub const COMPLETION_TIME: &str = "completion_time";
    pub const ERROR_MESSAGE: &str = "error_message";
    pub const RESOURCE_ID: &str = "resource_id";
    pub const RESOURCE_TYPE: &str = "resource_type";
    pub const REQUEST_EARLY_EXIT: &str = "request_early_exit";

    /// Sentinel `resource_id` for tasks skipped by a cache hit.
    pub const CACHED: &str = "Cached";
}

/// Lifecycle states of a pipeline record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PipelineStatus {
    Building,
    Running,
    Done,
    Terminated,
}

impl PipelineStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineStatus::Done | PipelineStatus::Terminated)
    }
}

impl std::fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            PipelineStatus::Building => "BUILDING",
            PipelineStatus::Running => "RUNNING",
            PipelineStatus::Done => "DONE",
            PipelineStatus::Terminated => "TERMINATED",
        };
        f.write_str(text)
    }
}

/// The record stored under a pipeline label.
///
/// `executed`, `executing`, and `waiting` partition `jobs` at every
/// persisted moment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRecord {
    pub label: String,
    pub job_name: String,
    #[serde(default)]
    pub version: Option<String>,
    pub status: PipelineStatus,
    #[serde(default)]
    pub jobs: Vec<String>,
    #[serde(default)]
    pub executed: Vec<String>,
    #[serde(default)]
    pub executing: Vec<String>,
    #[serde(default)]
    pub waiting: Vec<String>,
    #[serde(default)]
    pub submit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PipelineRecord {
    pub fn new(label: &str, job_name: &str, version: Option<String>) -> Self {
        Self {
            label: label.to_string(),
            job_name: job_name.to_string(),
            version,
            status: PipelineStatus::Building,
            jobs: Vec::new(),
            executed: Vec::new(),
            executing: Vec::new(),
            waiting: Vec::new(),
            submit_time: None,
            completion_time: None,
            error_message: None,
            extra: Map::new(),
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("pipeline record serializes")
    }
}

/// The record stored under a task's child label.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub label: String,
    /// Label of the owning pipeline.
    pub parent: String,
    /// Task-local name.
    pub name: String,
    pub command: Vec<String>,
    pub image: String,
    pub args: Vec<String>,
    pub resource_type: ResourceKind,
    #[serde(default)]
    pub node_selector: Option<HashMap<String, String>>,
    pub pull_policy: String,
    #[serde(default)]
    pub num_gpus: u32,
    #[serde(default)]
    pub inputs: Option<Vec<String>>,
    #[serde(default)]
    pub outputs: Option<Vec<String>>,
    /// Set once the task is submitted to Kubernetes, or `Cached`.
    #[serde(default)]
    pub resource_id: Option<String>,
    #[serde(default)]
    pub submit_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completion_time: Option<DateTime<Utc>>,
    /// A task may set this in its own record to finish the pipeline early.
    #[serde(default)]
    pub request_early_exit: Option<bool>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TaskRecord {
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).expect("task record serializes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pipeline_record_round_trips_extra_fields() {
        let mut record = PipelineRecord::new("sst2-abcj", "sst2", None);
        record.extra.insert("note".to_string(), json!("hand-edited"));
        let value = record.to_value();
        assert_eq!(value["status"], json!("BUILDING"));
        assert_eq!(value["note"], json!("hand-edited"));
        let back: PipelineRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back.extra["note"], json!("hand-edited"));
    }

    #[test]
    fn task_record_reads_early_exit_flag() {
        let record: TaskRecord = serde_json::from_value(json!({
            "label": "sst2-abcj--probe",
            "parent": "sst2-abcj",
            "name": "probe",
            "command": ["odin-probe"],
            "image": "img",
            "args": [],
            "resource_type": "Pod",
            "pull_policy": "IfNotPresent",
            "request_early_exit": true,
        }))
        .unwrap();
        assert_eq!(record.request_early_exit, Some(true));
    }

    #[test]
    fn status_serializes_uppercase() {
        assert_eq!(
            serde_json::to_value(PipelineStatus::Terminated).unwrap(),
            json!("TERMINATED")
        );
        assert!(PipelineStatus::Done.is_terminal());
        assert!(!PipelineStatus::Running.is_terminal());
    }
}
