//! Pipeline definition loading.
//!
//! A pipeline lives in a directory holding a `main.yml` with a top-level
//! `{name, tasks}`. Task argument strings undergo one substitution pass at
//! load time for the pipeline-local template variables (`${WORK_PATH}`,
//! `${RUN_PATH}`, `${TASK_ID}`, ...); `^` references are left for the
//! executor to resolve at run time. Per-task run directories are created
//! under `<DATA_PATH>/<pipeline_id>/` before anything is submitted.

pub mod error;

pub use error::{ConfigError, ConfigResult};

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use odin_core::task::Task;
use odin_core::{child_label, generate_pipeline_label, validate_pipeline_name};

pub const MAIN_FILE: &str = "main.yml";

pub const WORK_PATH: &str = "WORK_PATH";
pub const ROOT_PATH: &str = "ROOT_PATH";
pub const DATA_PATH: &str = "DATA_PATH";
pub const RUN_PATH: &str = "RUN_PATH";
pub const PIPE_ID: &str = "PIPE_ID";
pub const TASK_IDS: &str = "TASK_IDS";
pub const TASK_ID: &str = "TASK_ID";
pub const TASK_NAME: &str = "TASK_NAME";
pub const TASK_PATH: &str = "TASK_PATH";

static TEMPLATE_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap());

/// The derived paths and identifiers of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    pub work_path: PathBuf,
    pub root_path: PathBuf,
    pub data_path: PathBuf,
    pub run_path: PathBuf,
    pub pipe_id: String,
    pub task_ids: Vec<String>,
}

/// A parsed pipeline: its context plus the interpolated task list.
#[derive(Debug, Clone)]
pub struct LoadedPipeline {
    pub context: PipelineContext,
    pub tasks: Vec<Task>,
}

/// Substitute `${VAR}` template variables; an unknown variable is an error.
fn interpolate(text: &str, variables: &HashMap<&str, String>) -> ConfigResult<String> {
    let mut out = String::new();
    let mut last = 0;
    for captures in TEMPLATE_VAR.captures_iter(text) {
        let full = captures.get(0).unwrap();
        let name = &captures[1];
        let value = variables
            .get(name)
            .ok_or_else(|| ConfigError::MissingVariable(name.to_string()))?;
        out.push_str(&text[last..full.start()]);
        out.push_str(value);
        last = full.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Read in the pipeline configuration from a directory.
///
/// The names given in the file are task-local; the pipeline's actual id is
/// a randomized version of its `name` unless an explicit `pipeline_id` is
/// supplied. Every task gets its run directory created here so it exists
/// before the task is submitted.
pub fn read_pipeline_config(
    work_dir: &Path,
    root_dir: &Path,
    data_dir: Option<&Path>,
    main_file: Option<&Path>,
    pipeline_id: Option<&str>,
) -> ConfigResult<LoadedPipeline> {
    let template_file = main_file
        .map(Path::to_path_buf)
        .unwrap_or_else(|| work_dir.join(MAIN_FILE));
    tracing::info!(file = %template_file.display(), "loading pipeline definition");
    let contents = std::fs::read_to_string(&template_file)?;
    let flow: Value = serde_yaml::from_str(&contents)?;

    let basename = flow
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("flow")
        .to_string();
    if !validate_pipeline_name(&basename) {
        return Err(ConfigError::InvalidName(basename));
    }
    let pipe_id = match pipeline_id {
        Some(id) => format!("{basename}-{id}"),
        None => generate_pipeline_label(&basename),
    };

    let task_values = flow
        .get("tasks")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| ConfigError::MissingField("tasks".to_string()))?;

    let data_dir = data_dir.unwrap_or(work_dir);
    let run_dir = data_dir.join(&pipe_id);

    let mut task_ids = Vec::new();
    for task in &task_values {
        let name = task
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ConfigError::MissingField("name".to_string()))?;
        task_ids.push(child_label(&pipe_id, name));
    }

    let mut variables: HashMap<&str, String> = HashMap::from([
        (WORK_PATH, work_dir.display().to_string()),
        (ROOT_PATH, root_dir.display().to_string()),
        (DATA_PATH, data_dir.display().to_string()),
        (RUN_PATH, run_dir.display().to_string()),
        (PIPE_ID, pipe_id.clone()),
        (TASK_IDS, task_ids.join(" ")),
    ]);

    let mut seen = HashSet::new();
    let mut tasks = Vec::new();
    for (index, mut task) in task_values.into_iter().enumerate() {
        let name = task
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if !seen.insert(name.clone()) {
            return Err(ConfigError::Duplicate(name));
        }
        let task_dir = run_dir.join(&name);
        std::fs::create_dir_all(&task_dir)?;

        variables.insert(TASK_ID, task_ids[index].clone());
        variables.insert(TASK_NAME, name.clone());
        variables.insert(TASK_PATH, task_dir.display().to_string());

        if let Some(args) = task.get_mut("args").and_then(Value::as_array_mut) {
            for arg in args {
                if let Value::String(text) = arg {
                    let substituted = interpolate(text, &variables)?;
                    if substituted != *text {
                        tracing::info!(arg = %substituted, "interpolated");
                    }
                    *arg = Value::String(substituted);
                }
            }
        }
        tasks.push(serde_json::from_value(task)?);
    }

    Ok(LoadedPipeline {
        context: PipelineContext {
            work_path: work_dir.to_path_buf(),
            root_path: root_dir.to_path_buf(),
            data_path: data_dir.to_path_buf(),
            run_path: run_dir,
            pipe_id,
            task_ids,
        },
        tasks,
    })
}
