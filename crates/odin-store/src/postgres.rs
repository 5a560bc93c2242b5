//! PostgreSQL-backed store and cache.
//!
//! Records are stored with the queryable fields (`label`, `job_name`,
//! `version`, `status`, `submit_time`, `completion_time`, `parent_label`)
//! as typed columns and the complete record as a JSONB `details` column.
//! A record is a child iff `parent_label` is non-null.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::record::fields;
use crate::{Cache, Store, StoreError, StoreResult, label_of};

/// Create a new database connection pool.
pub async fn create_pool(database_url: &str) -> StoreResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &PgPool) -> StoreResult<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn text_field(value: &Value, field: &str) -> Option<String> {
    value.get(field).and_then(Value::as_str).map(str::to_string)
}

fn time_field(value: &Value, field: &str) -> Option<DateTime<Utc>> {
    value
        .get(field)
        .and_then(Value::as_str)
        .and_then(|text| DateTime::parse_from_rfc3339(text).ok())
        .map(|time| time.with_timezone(&Utc))
}

/// PostgreSQL implementation of [`Store`].
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn labels_like(&self, pattern: &str, children: bool) -> StoreResult<Vec<String>> {
        let query = if children {
            "SELECT label FROM jobs WHERE parent_label IS NOT NULL AND label ~ $1 ORDER BY label"
        } else {
            "SELECT label FROM jobs WHERE parent_label IS NULL AND label ~ $1 ORDER BY label"
        };
        let labels = sqlx::query_scalar::<_, String>(query)
            .bind(pattern)
            .fetch_all(&self.pool)
            .await?;
        Ok(labels)
    }
}

#[async_trait]
impl Store for PgStore {
    async fn get(&self, label: &str) -> StoreResult<Value> {
        sqlx::query_scalar::<_, Value>("SELECT details FROM jobs WHERE label = $1")
            .bind(label)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(label.to_string()))
    }

    async fn set(&self, value: Value) -> StoreResult<()> {
        let label = label_of(&value)?;
        sqlx::query(
            r#"
            INSERT INTO jobs (label, job_name, version, status, submit_time, completion_time, parent_label, details)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (label) DO UPDATE SET
                job_name = EXCLUDED.job_name,
                version = EXCLUDED.version,
                status = EXCLUDED.status,
                submit_time = EXCLUDED.submit_time,
                completion_time = EXCLUDED.completion_time,
                parent_label = EXCLUDED.parent_label,
                details = EXCLUDED.details
            "#,
        )
        .bind(&label)
        .bind(text_field(&value, fields::JOB_NAME))
        .bind(text_field(&value, fields::VERSION))
        .bind(text_field(&value, fields::STATUS))
        .bind(time_field(&value, fields::SUBMIT_TIME))
        .bind(time_field(&value, fields::COMPLETION_TIME))
        .bind(text_field(&value, fields::PARENT))
        .bind(&value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn exists(&self, label: &str) -> StoreResult<bool> {
        let exists =
            sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM jobs WHERE label = $1)")
                .bind(label)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn remove(&self, label: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE label = $1")
            .bind(label)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn parents_like(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.labels_like(pattern, false).await
    }

    async fn children_like(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.labels_like(pattern, true).await
    }
}

/// PostgreSQL implementation of [`Cache`].
pub struct PgCache {
    pool: PgPool,
}

impl PgCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Cache for PgCache {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let value = sqlx::query_scalar::<_, String>("SELECT outputs FROM hashes WHERE inputs = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO hashes (inputs, outputs)
            VALUES ($1, $2)
            ON CONFLICT (inputs) DO UPDATE SET outputs = EXCLUDED.outputs
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM hashes WHERE inputs = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>("SELECT inputs FROM hashes ORDER BY inputs")
            .fetch_all(&self.pool)
            .await?;
        Ok(keys)
    }
}
