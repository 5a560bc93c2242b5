//! Store and cache errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no job {0} found in jobs db")]
    NotFound(String),

    #[error("records must carry a `label` field to be persisted")]
    MissingLabel,

    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("document store error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[error("bson error: {0}")]
    Bson(#[from] mongodb::bson::ser::Error),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;
