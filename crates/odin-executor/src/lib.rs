//! The pipeline control loop.
//!
//! An [`Executor`] runs one pipeline: it builds the DAG, persists the
//! pipeline and task records, and walks the parallel topological layers,
//! resolving references, consulting the fingerprint cache, submitting tasks
//! through the task manager, and collecting completions as they finish.
//! Progress events stream to the caller over a channel; a caller that has
//! gone away never stops the pipeline.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use futures::StreamExt;
use futures::stream::FuturesUnordered;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::mpsc;

use odin_core::task::Task;
use odin_core::{
    build_graph, child_label, dot_graph, extract_path, hash_args, hash_files, hash_text,
    parse_reference, rewrite_references, topo_sort_parallel,
};
use odin_k8s::{K8sError, StatusType, TaskManager};
use odin_store::{Cache, PipelineRecord, PipelineStatus, Store, StoreError, TaskRecord, fields};

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Dag(#[from] odin_core::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    K8s(#[from] K8sError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type ExecResult<T> = std::result::Result<T, ExecError>;

/// Hash everything that is an input to a task: its command line, its
/// container image digests, and its declared input files.
pub async fn hash_inputs(task: &Task, manager: &dyn TaskManager) -> Result<String, K8sError> {
    let arg_hash = hash_args(&task.command, &task.args);
    tracing::debug!(task = %task.name, hash = %arg_hash, "argument hash");
    let container_hashes = manager.hash_task(task).await?;
    tracing::debug!(task = %task.name, hashes = ?container_hashes, "container hashes");
    let input_hash = match &task.inputs {
        Some(inputs) => hash_files(inputs),
        None => String::new(),
    };
    Ok(hash_text(&format!(
        "{arg_hash}{}{input_hash}",
        container_hashes.join("")
    )))
}

/// Hash a task's declared output file set: SHA-1 over the JSON of per-path
/// file hashes, keys in sorted order.
pub fn hash_outputs(outputs: &[String]) -> String {
    let output_hashes: BTreeMap<&str, String> = outputs
        .iter()
        .map(|output| (output.as_str(), hash_files([output])))
        .collect();
    hash_text(&serde_json::to_string(&output_hashes).expect("output hashes serialize"))
}

/// Render a resolved reference for use as a command-line argument.
fn value_to_arg(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

/// A task prepared for one run: its globally unique child label and the
/// runtime task whose `name` has been rewritten to that label.
struct RunTask {
    label: String,
    task: Task,
}

/// A task scheduler backed by the job store, the fingerprint cache, and a
/// task manager. Tasks with no dependencies on each other run in parallel;
/// layers are strictly sequential.
pub struct Executor {
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    manager: Arc<dyn TaskManager>,
}

impl Executor {
    pub fn new(
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        manager: Arc<dyn TaskManager>,
    ) -> Self {
        Self {
            store,
            cache,
            manager,
        }
    }

    /// Run a pipeline by stepping through its topological layers.
    ///
    /// Progress strings are emitted on `progress` at each submission, each
    /// completion, and each terminal transition; emission is best-effort.
    /// Task failure terminates the pipeline but is not an error of the run
    /// itself; DAG, submission, and persistence failures are.
    pub async fn run(
        &self,
        pipeline_id: &str,
        job_name: &str,
        revision: Option<String>,
        tasks: Vec<Task>,
        progress: mpsc::Sender<String>,
    ) -> ExecResult<()> {
        let mut pipe = PipelineRecord::new(pipeline_id, job_name, revision);
        pipe.submit_time = Some(Utc::now());

        let task_values: Vec<Value> = tasks
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<_, _>>()?;
        let layers = match build_graph(&task_values, &HashMap::new())
            .and_then(|graph| {
                let names: Vec<String> = tasks.iter().map(|task| task.name.clone()).collect();
                tracing::info!("{}", dot_graph(&graph, &names));
                topo_sort_parallel(&graph)
            }) {
            Ok(layers) => layers,
            Err(err) => {
                pipe.status = PipelineStatus::Terminated;
                pipe.error_message = Some(err.to_string());
                self.store.set(pipe.to_value()).await?;
                let _ = progress.send(format!("Pipeline {pipeline_id} terminated")).await;
                return Err(err.into());
            }
        };

        self.store.set(pipe.to_value()).await?;

        // Create every task record up front, grouped by layer.
        let mut task_layers: Vec<Vec<RunTask>> = Vec::new();
        for layer in &layers {
            let mut group = Vec::new();
            for &index in layer {
                let task = &tasks[index];
                let label = child_label(pipeline_id, &task.name);
                let mut run_task = task.clone();
                run_task.name = label.clone();
                let record = TaskRecord {
                    label: label.clone(),
                    parent: pipeline_id.to_string(),
                    name: task.name.clone(),
                    command: task.command.clone(),
                    image: task.image.clone(),
                    args: task.args.clone(),
                    resource_type: task.resource_type,
                    node_selector: task.node_selector.clone(),
                    pull_policy: task.pull_policy.clone(),
                    num_gpus: task.num_gpus,
                    inputs: task.inputs.clone(),
                    outputs: task.outputs.clone(),
                    resource_id: None,
                    submit_time: None,
                    completion_time: None,
                    request_early_exit: None,
                    extra: serde_json::Map::new(),
                };
                self.store.set(record.to_value()).await?;
                group.push(RunTask {
                    label,
                    task: run_task,
                });
            }
            task_layers.push(group);
        }

        pipe.status = PipelineStatus::Running;
        pipe.jobs = task_layers
            .iter()
            .flat_map(|layer| layer.iter().map(|t| t.label.clone()))
            .collect();
        pipe.waiting = pipe.jobs.clone();
        self.store.set(pipe.to_value()).await?;

        for (layer_index, layer) in task_layers.iter().enumerate() {
            // Last round's tasks are still executing; move them along, then
            // promote this layer out of waiting.
            let executing = std::mem::take(&mut pipe.executing);
            pipe.executed.extend(executing);
            pipe.executing = layer.iter().map(|t| t.label.clone()).collect();
            pipe.waiting = task_layers[layer_index + 1..]
                .iter()
                .flat_map(|later| later.iter().map(|t| t.label.clone()))
                .collect();
            self.store.set(pipe.to_value()).await?;

            // Freeze a snapshot of the ancestors' records for reference
            // resolution; the layering invariant guarantees they are all
            // persisted by now.
            let mut snapshot: HashMap<String, Value> = HashMap::new();
            for label in &pipe.executed {
                let record = self.store.get(label).await?;
                if let Some(local) = record.get(fields::NAME).and_then(Value::as_str) {
                    snapshot.insert(local.to_string(), record.clone());
                }
            }
            let resolve = move |reference: &str| -> Value {
                let path = parse_reference(reference);
                let Some(record) = snapshot.get(path[0]) else {
                    return Value::Null;
                };
                extract_path(&path[1..], record)
                    .cloned()
                    .unwrap_or(Value::Null)
            };

            let mut running: Vec<Task> = Vec::new();
            let mut input_hashes: HashMap<String, String> = HashMap::new();

            for run_task in layer {
                let mut task = run_task.task.clone();
                task.args = task
                    .args
                    .iter()
                    .map(|arg| value_to_arg(rewrite_references(arg, &resolve)))
                    .collect();
                if let Some(inputs) = task.inputs.take() {
                    let mut resolved = Vec::new();
                    for input in &inputs {
                        match rewrite_references(input, &resolve) {
                            Value::Array(items) => {
                                resolved.extend(items.into_iter().map(value_to_arg));
                            }
                            other => resolved.push(value_to_arg(other)),
                        }
                    }
                    task.inputs = Some(resolved);
                }

                // The record must reflect what actually executes.
                let mut record = self.store.get(&run_task.label).await?;
                record["args"] = json!(task.args);
                record["inputs"] = json!(task.inputs);
                self.store.set(record).await?;

                let has_outputs = task.outputs.as_ref().is_some_and(|o| !o.is_empty());
                if has_outputs {
                    let in_hash = match hash_inputs(&task, self.manager.as_ref()).await {
                        Ok(in_hash) => in_hash,
                        Err(K8sError::Submit(message)) => {
                            return self
                                .terminate(&mut pipe, pipeline_id, message, &progress)
                                .await;
                        }
                        Err(err) => return Err(err.into()),
                    };
                    let out_hash = hash_outputs(task.outputs.as_deref().unwrap_or_default());
                    let previous = match self.cache.get(&in_hash).await {
                        Ok(previous) => previous,
                        Err(err) => {
                            tracing::warn!(error = %err, "cache lookup failed, re-running");
                            None
                        }
                    };
                    if previous.as_deref() == Some(out_hash.as_str()) {
                        tracing::info!("{} is cached and will not be run", run_task.label);
                        let mut record = self.store.get(&run_task.label).await?;
                        record[fields::RESOURCE_ID] = json!(fields::CACHED);
                        record[fields::COMPLETION_TIME] = json!(Utc::now());
                        self.store.set(record).await?;
                        pipe.executing.retain(|label| label != &run_task.label);
                        pipe.executed.push(run_task.label.clone());
                        self.store.set(pipe.to_value()).await?;
                        continue;
                    }
                    tracing::info!(
                        "output hash for {} doesn't match the stored hash, re-running",
                        run_task.label
                    );
                    input_hashes.insert(run_task.label.clone(), in_hash);
                }

                tracing::info!("Submitting {}", run_task.label);
                let _ = progress.send(format!("Submitting {}", run_task.label)).await;
                let resource_id = match self.manager.submit(&task).await {
                    Ok(resource_id) => resource_id,
                    Err(err) => {
                        return self
                            .terminate(&mut pipe, pipeline_id, err.to_string(), &progress)
                            .await;
                    }
                };
                let mut record = self.store.get(&run_task.label).await?;
                record[fields::RESOURCE_ID] = json!(resource_id);
                record[fields::SUBMIT_TIME] = json!(Utc::now());
                self.store.set(record).await?;
                running.push(task);
            }

            // Collect completions in the order the cluster finishes them.
            let mut completions: FuturesUnordered<_> = running
                .into_iter()
                .map(|task| {
                    let manager = Arc::clone(&self.manager);
                    async move {
                        let status = manager.wait_for(&task).await;
                        (task, status)
                    }
                })
                .collect();
            while let Some((task, status)) = completions.next().await {
                let label = task.name.clone();
                tracing::info!("Done running {label}");
                let _ = progress.send(format!("Done running {label}")).await;
                let mut record = self.store.get(&label).await?;
                record[fields::COMPLETION_TIME] = json!(Utc::now());
                self.store.set(record).await?;

                let status = status?;
                if status.status_type != StatusType::Succeeded {
                    pipe.status = PipelineStatus::Terminated;
                    pipe.error_message = Some(
                        status
                            .message
                            .unwrap_or_else(|| format!("Task `{label}` failed")),
                    );
                    self.store.set(pipe.to_value()).await?;
                    tracing::error!(task = %label, error = ?pipe.error_message, "task failed");
                    continue;
                }

                // The task may have asked for the pipeline to stop after it.
                let record = self.store.get(&label).await?;
                if record
                    .get(fields::REQUEST_EARLY_EXIT)
                    .and_then(Value::as_bool)
                    == Some(true)
                {
                    tracing::info!("{label} requested an early exit, pipeline will complete now");
                    pipe.status = PipelineStatus::Done;
                }

                pipe.executing.retain(|executing| executing != &label);
                pipe.executed.push(label.clone());
                self.store.set(pipe.to_value()).await?;

                if let Some(in_hash) = input_hashes.get(&label) {
                    let outputs = task.outputs.as_deref().unwrap_or_default();
                    tracing::info!("saving the hash of {label}'s outputs");
                    if let Err(err) = self.cache.set(in_hash, &hash_outputs(outputs)).await {
                        tracing::warn!(error = %err, "cache write failed, pipeline continues");
                    }
                }
            }

            if pipe.status == PipelineStatus::Terminated {
                let _ = progress.send(format!("Pipeline {pipeline_id} terminated")).await;
                break;
            }
            if pipe.status == PipelineStatus::Done {
                break;
            }
        }

        pipe.completion_time = Some(Utc::now());
        if !pipe.executing.is_empty() && pipe.status != PipelineStatus::Terminated {
            let executing = std::mem::take(&mut pipe.executing);
            pipe.executed.extend(executing);
        }
        if pipe.status != PipelineStatus::Terminated {
            pipe.status = PipelineStatus::Done;
        }
        self.store.set(pipe.to_value()).await?;
        Ok(())
    }

    /// Persist termination after a submit failure and emit the final event.
    async fn terminate(
        &self,
        pipe: &mut PipelineRecord,
        pipeline_id: &str,
        message: String,
        progress: &mpsc::Sender<String>,
    ) -> ExecResult<()> {
        pipe.status = PipelineStatus::Terminated;
        pipe.error_message = Some(message.clone());
        self.store.set(pipe.to_value()).await?;
        let _ = progress.send(format!("Pipeline {pipeline_id} terminated")).await;
        Err(ExecError::K8s(K8sError::Submit(message)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use odin_k8s::{K8sResult, Status};
    use odin_store::{MemoryCache, MemoryStore};
    use std::collections::HashSet;
    use std::sync::Mutex;
    use tokio::sync::mpsc::Receiver;

    struct MockManager {
        store: Arc<MemoryStore>,
        fail: HashMap<String, String>,
        on_complete: HashMap<String, Value>,
        fail_submit: Option<String>,
        submitted: Mutex<Vec<String>>,
    }

    impl MockManager {
        fn new(store: Arc<MemoryStore>) -> Self {
            Self {
                store,
                fail: HashMap::new(),
                on_complete: HashMap::new(),
                fail_submit: None,
                submitted: Mutex::new(Vec::new()),
            }
        }

        fn submitted(&self) -> Vec<String> {
            self.submitted.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TaskManager for MockManager {
        async fn submit(&self, task: &Task) -> K8sResult<String> {
            if let Some(message) = &self.fail_submit {
                return Err(K8sError::Submit(message.clone()));
            }
            self.submitted.lock().unwrap().push(task.name.clone());
            Ok(task.name.clone())
        }

        async fn status(&self, handle: &str) -> K8sResult<Status> {
            Ok(match self.fail.get(handle) {
                Some(message) => Status::new(StatusType::Failed, Some(message.clone())),
                None => Status::new(StatusType::Succeeded, None),
            })
        }

        async fn wait_for(&self, task: &Task) -> K8sResult<Status> {
            // Simulate the task writing into its own record while running.
            if let Some(extra) = self.on_complete.get(&task.name) {
                let mut record = self.store.get(&task.name).await.unwrap();
                for (key, value) in extra.as_object().unwrap() {
                    record[key.as_str()] = value.clone();
                }
                self.store.set(record).await.unwrap();
            }
            self.status(&task.name).await
        }

        async fn kill(&self, _handle: &str) -> K8sResult<()> {
            Ok(())
        }

        async fn hash_task(&self, _task: &Task) -> K8sResult<Vec<String>> {
            Ok(vec!["0badc0de".to_string()])
        }
    }

    fn make_task(name: &str, extra: Value) -> Task {
        let mut value = json!({
            "name": name,
            "image": "example.com/worker:latest",
            "command": ["run"],
        });
        value
            .as_object_mut()
            .unwrap()
            .extend(extra.as_object().unwrap().clone());
        serde_json::from_value(value).unwrap()
    }

    async fn run_pipeline(
        pipeline_id: &str,
        tasks: Vec<Task>,
        store: Arc<MemoryStore>,
        cache: Arc<MemoryCache>,
        manager: Arc<MockManager>,
    ) -> (ExecResult<()>, Receiver<String>) {
        let executor = Executor::new(store, cache, manager);
        let (tx, rx) = mpsc::channel(100);
        let result = executor
            .run(pipeline_id, "job", None, tasks, tx)
            .await;
        (result, rx)
    }

    fn drain(mut rx: Receiver<String>) -> Vec<String> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    async fn pipeline_record(store: &MemoryStore, pipeline_id: &str) -> PipelineRecord {
        serde_json::from_value(store.get(pipeline_id).await.unwrap()).unwrap()
    }

    fn assert_partition(pipe: &PipelineRecord) {
        let executed: HashSet<_> = pipe.executed.iter().collect();
        let executing: HashSet<_> = pipe.executing.iter().collect();
        let waiting: HashSet<_> = pipe.waiting.iter().collect();
        assert!(executed.is_disjoint(&executing));
        assert!(executed.is_disjoint(&waiting));
        assert!(executing.is_disjoint(&waiting));
        let jobs: HashSet<_> = pipe.jobs.iter().collect();
        let union: HashSet<_> = executed
            .union(&executing)
            .chain(waiting.iter())
            .copied()
            .collect();
        assert_eq!(jobs, union);
    }

    #[tokio::test]
    async fn linear_pipeline_succeeds_in_order() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let manager = Arc::new(MockManager::new(store.clone()));
        let tasks = vec![
            make_task("a", json!({})),
            make_task("b", json!({"depends": ["a"]})),
            make_task("c", json!({"depends": ["b"]})),
        ];
        let (result, rx) =
            run_pipeline("lin-testj", tasks, store.clone(), cache, manager.clone()).await;
        result.unwrap();

        let pipe = pipeline_record(&store, "lin-testj").await;
        assert_eq!(pipe.status, PipelineStatus::Done);
        assert_eq!(
            pipe.executed,
            vec!["lin-testj--a", "lin-testj--b", "lin-testj--c"]
        );
        assert!(pipe.executing.is_empty());
        assert!(pipe.waiting.is_empty());
        assert!(pipe.completion_time.is_some());
        assert_partition(&pipe);

        let messages = drain(rx);
        let expected = [
            "Submitting lin-testj--a",
            "Done running lin-testj--a",
            "Submitting lin-testj--b",
            "Done running lin-testj--b",
            "Submitting lin-testj--c",
            "Done running lin-testj--c",
        ];
        assert_eq!(messages, expected);
        assert_eq!(manager.submitted().len(), 3);
    }

    #[tokio::test]
    async fn diamond_failure_terminates_and_drains() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let mut manager = MockManager::new(store.clone());
        manager
            .fail
            .insert("dia-testj--c".to_string(), "c blew up".to_string());
        let manager = Arc::new(manager);
        let tasks = vec![
            make_task("a", json!({})),
            make_task("b", json!({"depends": ["a"]})),
            make_task("c", json!({"depends": ["a"]})),
            make_task("d", json!({"depends": ["b", "c"]})),
        ];
        let (result, rx) =
            run_pipeline("dia-testj", tasks, store.clone(), cache, manager.clone()).await;
        result.unwrap();

        let pipe = pipeline_record(&store, "dia-testj").await;
        assert_eq!(pipe.status, PipelineStatus::Terminated);
        assert_eq!(pipe.error_message.as_deref(), Some("c blew up"));
        assert!(pipe.executed.contains(&"dia-testj--a".to_string()));
        assert!(pipe.executed.contains(&"dia-testj--b".to_string()));
        assert_eq!(pipe.executing, vec!["dia-testj--c"]);
        assert_eq!(pipe.waiting, vec!["dia-testj--d"]);
        assert_partition(&pipe);

        // The failing layer is drained, the next layer is never submitted.
        assert!(!manager.submitted().contains(&"dia-testj--d".to_string()));
        let messages = drain(rx);
        assert!(messages.contains(&"Pipeline dia-testj terminated".to_string()));
    }

    #[tokio::test]
    async fn references_resolve_before_submission() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let mut manager = MockManager::new(store.clone());
        manager.on_complete.insert(
            "ref-testj--gen".to_string(),
            json!({"out": {"path": "/data/file"}}),
        );
        let manager = Arc::new(manager);
        let tasks = vec![
            make_task("gen", json!({})),
            make_task("use", json!({"args": ["--in={^gen.out.path}-suffix"]})),
        ];
        let (result, _rx) =
            run_pipeline("ref-testj", tasks, store.clone(), cache, manager).await;
        result.unwrap();

        let record = store.get("ref-testj--use").await.unwrap();
        assert_eq!(record["args"], json!(["--in=/data/file-suffix"]));
    }

    #[tokio::test]
    async fn second_identical_run_is_cached() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let tasks = || {
            vec![make_task(
                "train",
                json!({"outputs": ["/no/such/odin-test-output"]}),
            )]
        };

        let first = Arc::new(MockManager::new(store.clone()));
        let (result, _rx) = run_pipeline(
            "cache-onej",
            tasks(),
            store.clone(),
            cache.clone(),
            first.clone(),
        )
        .await;
        result.unwrap();
        assert_eq!(first.submitted(), vec!["cache-onej--train"]);

        let second = Arc::new(MockManager::new(store.clone()));
        let (result, _rx) = run_pipeline(
            "cache-twoj",
            tasks(),
            store.clone(),
            cache.clone(),
            second.clone(),
        )
        .await;
        result.unwrap();

        // Never submitted; recorded as cached and executed anyway.
        assert!(second.submitted().is_empty());
        let record = store.get("cache-twoj--train").await.unwrap();
        assert_eq!(record[fields::RESOURCE_ID], json!("Cached"));
        assert!(record[fields::COMPLETION_TIME].is_string());
        let pipe = pipeline_record(&store, "cache-twoj").await;
        assert_eq!(pipe.status, PipelineStatus::Done);
        assert_eq!(pipe.executed, vec!["cache-twoj--train"]);
    }

    #[tokio::test]
    async fn early_exit_skips_later_layers() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let mut manager = MockManager::new(store.clone());
        manager.on_complete.insert(
            "early-testj--probe".to_string(),
            json!({"request_early_exit": true}),
        );
        let manager = Arc::new(manager);
        let tasks = vec![
            make_task("probe", json!({})),
            make_task("later", json!({"depends": ["probe"]})),
        ];
        let (result, _rx) =
            run_pipeline("early-testj", tasks, store.clone(), cache, manager.clone()).await;
        result.unwrap();

        let pipe = pipeline_record(&store, "early-testj").await;
        assert_eq!(pipe.status, PipelineStatus::Done);
        assert_eq!(pipe.executed, vec!["early-testj--probe"]);
        assert_eq!(pipe.waiting, vec!["early-testj--later"]);
        assert_eq!(manager.submitted(), vec!["early-testj--probe"]);
    }

    #[tokio::test]
    async fn dag_cycle_terminates_before_any_submit() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let manager = Arc::new(MockManager::new(store.clone()));
        let tasks = vec![
            make_task("a", json!({"depends": ["b"]})),
            make_task("b", json!({"depends": ["a"]})),
        ];
        let (result, rx) =
            run_pipeline("cyc-testj", tasks, store.clone(), cache, manager.clone()).await;
        assert!(matches!(result, Err(ExecError::Dag(odin_core::Error::Cycle))));

        let pipe = pipeline_record(&store, "cyc-testj").await;
        assert_eq!(pipe.status, PipelineStatus::Terminated);
        assert_eq!(pipe.error_message.as_deref(), Some("graph has a cycle"));
        assert!(manager.submitted().is_empty());
        let messages = drain(rx);
        assert_eq!(messages, vec!["Pipeline cyc-testj terminated"]);
    }

    #[tokio::test]
    async fn submit_failure_terminates_the_pipeline() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let mut manager = MockManager::new(store.clone());
        manager.fail_submit = Some("no quota".to_string());
        let manager = Arc::new(manager);
        let tasks = vec![make_task("a", json!({}))];
        let (result, _rx) =
            run_pipeline("sub-testj", tasks, store.clone(), cache, manager).await;
        assert!(matches!(result, Err(ExecError::K8s(K8sError::Submit(_)))));

        let pipe = pipeline_record(&store, "sub-testj").await;
        assert_eq!(pipe.status, PipelineStatus::Terminated);
        assert_eq!(pipe.error_message.as_deref(), Some("failed to submit task: no quota"));
    }

    #[tokio::test]
    async fn terminal_status_is_never_overwritten() {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(MemoryCache::new());
        let mut manager = MockManager::new(store.clone());
        manager
            .fail
            .insert("term-testj--a".to_string(), "boom".to_string());
        let manager = Arc::new(manager);
        let tasks = vec![
            make_task("a", json!({})),
            make_task("b", json!({"depends": ["a"]})),
        ];
        let (result, _rx) =
            run_pipeline("term-testj", tasks, store.clone(), cache, manager).await;
        result.unwrap();

        let pipe = pipeline_record(&store, "term-testj").await;
        assert_eq!(pipe.status, PipelineStatus::Terminated);
        // The wrap-up pass must not flip a terminated pipeline to done.
        assert!(pipe.completion_time.is_some());
    }

    #[test]
    fn output_hash_is_order_independent() {
        let a = hash_outputs(&["/x/one".to_string(), "/x/two".to_string()]);
        let b = hash_outputs(&["/x/two".to_string(), "/x/one".to_string()]);
        assert_eq!(a, b);
    }
}
