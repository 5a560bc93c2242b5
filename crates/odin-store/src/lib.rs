//! Job store and hash cache for odin.
//!
//! The job store is a durable map from pipeline/task label to a JSON record;
//! the hash cache is a durable map from input fingerprint to output
//! fingerprint. Both come in three flavors: in-memory (tests), PostgreSQL
//! (relational, typed columns + a JSONB blob), and MongoDB (document).

pub mod error;
pub mod memory;
pub mod mongo;
pub mod postgres;
pub mod record;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryCache, MemoryStore};
pub use mongo::{MongoCache, MongoStore};
pub use postgres::{PgCache, PgStore, create_pool, run_migrations};
pub use record::{PipelineRecord, PipelineStatus, TaskRecord, fields};

use async_trait::async_trait;
use serde_json::Value;

use odin_core::label::is_child_label;

/// Interface to the jobs database.
///
/// Records are JSON objects keyed by their `label` field. The executor is
/// the sole writer for any given pipeline, so last-writer-wins upserts are
/// sufficient.
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch the record stored under `label`.
    async fn get(&self, label: &str) -> StoreResult<Value>;

    /// Upsert a record. Rejects values without a `label` field.
    async fn set(&self, value: Value) -> StoreResult<()>;

    /// Is there a record under `label`?
    async fn exists(&self, label: &str) -> StoreResult<bool>;

    /// Delete the record under `label`; `false` if it was absent.
    async fn remove(&self, label: &str) -> StoreResult<bool>;

    /// Labels of parent records (no parent reference) matching `pattern`.
    async fn parents_like(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Labels of child records (non-null parent reference) matching `pattern`.
    async fn children_like(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// The record of this record's parent pipeline.
    async fn get_parent(&self, label: &str) -> StoreResult<Value> {
        let child = self.get(label).await?;
        let parent = child
            .get(fields::PARENT)
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::NotFound(format!("parent of {label}")))?
            .to_string();
        self.get(&parent).await
    }

    /// The records of every executed sibling of this task's pipeline.
    async fn get_previous(&self, label: &str) -> StoreResult<Vec<Value>> {
        let parent = self.get_parent(label).await?;
        let mut previous = Vec::new();
        if let Some(executed) = parent.get(fields::EXECUTED).and_then(Value::as_array) {
            for prev in executed {
                if let Some(prev) = prev.as_str() {
                    previous.push(self.get(prev).await?);
                }
            }
        }
        Ok(previous)
    }

    /// Is the label a child of a pipeline? Child labels carry the `j--`
    /// marker, so no lookup is needed.
    fn is_a_child(&self, label: &str) -> bool {
        is_child_label(label)
    }
}

/// The fingerprint cache: input fingerprint to output fingerprint.
///
/// Shared across pipelines and advisory only; a write failure is never fatal
/// to a running pipeline.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Fetch the output fingerprint recorded under `key`.
    async fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Record `value` under `key`, overwriting any previous value.
    async fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Drop the entry under `key`.
    async fn delete(&self, key: &str) -> StoreResult<()>;

    /// All keys in the cache.
    async fn keys(&self) -> StoreResult<Vec<String>>;
}

/// Require a `label` field before persisting a record.
pub(crate) fn label_of(value: &Value) -> StoreResult<String> {
    value
        .get(fields::LABEL)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(StoreError::MissingLabel)
}
