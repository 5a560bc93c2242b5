//! MongoDB-backed store and cache.
//!
//! The document store keeps records verbatim in a `jobs` collection with a
//! unique index on `label`; the cache lives in a `hashes` collection keyed
//! by the input fingerprint.

use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{Document, doc};
use mongodb::options::IndexOptions;
use mongodb::{Client, Collection, IndexModel};
use serde_json::Value;

use crate::record::fields;
use crate::{Cache, Store, StoreError, StoreResult, label_of};

const JOBS_COLL: &str = "jobs";
const HASHES_COLL: &str = "hashes";
const IN_FIELD: &str = "inputs";
const OUT_FIELD: &str = "outputs";

fn to_document(value: &Value) -> StoreResult<Document> {
    Ok(mongodb::bson::to_document(value)?)
}

fn to_value(mut document: Document) -> StoreResult<Value> {
    document.remove("_id");
    Ok(serde_json::to_value(&document)?)
}

/// MongoDB implementation of [`Store`].
pub struct MongoStore {
    jobs: Collection<Document>,
}

impl MongoStore {
    /// Connect to the backend and make sure the label index exists.
    pub async fn connect(uri: &str, db: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(uri).await?;
        let jobs = client.database(db).collection::<Document>(JOBS_COLL);
        let index = IndexModel::builder()
            .keys(doc! { fields::LABEL: 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        jobs.create_index(index).await?;
        Ok(Self { jobs })
    }

    async fn labels_like(&self, pattern: &str, children: bool) -> StoreResult<Vec<String>> {
        let parent_filter = if children {
            doc! { "$ne": null }
        } else {
            doc! { "$eq": null }
        };
        let filter = doc! {
            fields::LABEL: { "$regex": pattern },
            fields::PARENT: parent_filter,
        };
        let mut cursor = self.jobs.find(filter).await?;
        let mut labels = Vec::new();
        while let Some(document) = cursor.try_next().await? {
            if let Ok(label) = document.get_str(fields::LABEL) {
                labels.push(label.to_string());
            }
        }
        labels.sort();
        Ok(labels)
    }
}

#[async_trait]
impl Store for MongoStore {
    async fn get(&self, label: &str) -> StoreResult<Value> {
        let document = self
            .jobs
            .find_one(doc! { fields::LABEL: label })
            .await?
            .ok_or_else(|| StoreError::NotFound(label.to_string()))?;
        to_value(document)
    }

    async fn set(&self, value: Value) -> StoreResult<()> {
        let label = label_of(&value)?;
        let document = to_document(&value)?;
        self.jobs
            .replace_one(doc! { fields::LABEL: label }, document)
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn exists(&self, label: &str) -> StoreResult<bool> {
        let count = self
            .jobs
            .count_documents(doc! { fields::LABEL: label })
            .await?;
        Ok(count > 0)
    }

    async fn remove(&self, label: &str) -> StoreResult<bool> {
        let result = self.jobs.delete_one(doc! { fields::LABEL: label }).await?;
        Ok(result.deleted_count > 0)
    }

    async fn parents_like(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.labels_like(pattern, false).await
    }

    async fn children_like(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.labels_like(pattern, true).await
    }
}

/// MongoDB implementation of [`Cache`].
pub struct MongoCache {
    hashes: Collection<Document>,
}

impl MongoCache {
    /// Connect to the backend and make sure the fingerprint index exists.
    pub async fn connect(uri: &str, db: &str) -> StoreResult<Self> {
        let client = Client::with_uri_str(uri).await?;
        let hashes = client.database(db).collection::<Document>(HASHES_COLL);
        let index = IndexModel::builder()
            .keys(doc! { IN_FIELD: 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        hashes.create_index(index).await?;
        Ok(Self { hashes })
    }
}

#[async_trait]
impl Cache for MongoCache {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let hit = self.hashes.find_one(doc! { IN_FIELD: key }).await?;
        Ok(hit.and_then(|document| document.get_str(OUT_FIELD).map(str::to_string).ok()))
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.hashes
            .replace_one(
                doc! { IN_FIELD: key },
                doc! { IN_FIELD: key, OUT_FIELD: value },
            )
            .upsert(true)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.hashes.delete_one(doc! { IN_FIELD: key }).await?;
        Ok(())
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        let mut cursor = self.hashes.find(doc! {}).await?;
        let mut keys = Vec::new();
        while let Some(document) = cursor.try_next().await? {
            if let Ok(key) = document.get_str(IN_FIELD) {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }
}
