//! Error types for the core crate.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("graph has a cycle")]
    Cycle,

    #[error("task names cannot contain `.`, found `{0}`")]
    InvalidTaskName(String),

    #[error("task names must be unique, found `{0}` twice")]
    DuplicateTaskName(String),

    #[error("dependency `{dep}` of task `{task}` not found in graph")]
    UnknownDependency { task: String, dep: String },

    #[error("pipeline name must match `[a-z0-9\\-.]+`, got `{0}`")]
    InvalidPipelineName(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
