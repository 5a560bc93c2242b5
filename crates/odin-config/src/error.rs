//! Pipeline configuration errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid task definition: {0}")]
    Task(#[from] serde_json::Error),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("pipeline name must match `[a-z0-9\\-.]+`, got `{0}`")]
    InvalidName(String),

    #[error("task names must be unique, found `{0}` twice")]
    Duplicate(String),

    #[error("unknown template variable `${{{0}}}`")]
    MissingVariable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
