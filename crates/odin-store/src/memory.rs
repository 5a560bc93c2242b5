//! In-memory store and cache, mainly for tests.

use std::collections::HashMap;

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::{Cache, Store, StoreError, StoreResult, label_of};

/// Memory-backed [`Store`].
#[derive(Default)]
pub struct MemoryStore {
    db: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn matching(&self, pattern: &str, children: bool) -> StoreResult<Vec<String>> {
        let pattern = Regex::new(pattern)?;
        let db = self.db.read().await;
        let mut labels: Vec<String> = db
            .keys()
            .filter(|label| pattern.is_match(label))
            .filter(|label| self.is_a_child(label) == children)
            .cloned()
            .collect();
        labels.sort();
        Ok(labels)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, label: &str) -> StoreResult<Value> {
        self.db
            .read()
            .await
            .get(label)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(label.to_string()))
    }

    async fn set(&self, value: Value) -> StoreResult<()> {
        let label = label_of(&value)?;
        self.db.write().await.insert(label, value);
        Ok(())
    }

    async fn exists(&self, label: &str) -> StoreResult<bool> {
        Ok(self.db.read().await.contains_key(label))
    }

    async fn remove(&self, label: &str) -> StoreResult<bool> {
        Ok(self.db.write().await.remove(label).is_some())
    }

    async fn parents_like(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.matching(pattern, false).await
    }

    async fn children_like(&self, pattern: &str) -> StoreResult<Vec<String>> {
        self.matching(pattern, true).await
    }
}

/// Memory-backed [`Cache`].
#[derive(Default)]
pub struct MemoryCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self) -> StoreResult<Vec<String>> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fields;
    use serde_json::json;

    fn parent(label: &str) -> Value {
        json!({
            fields::LABEL: label,
            fields::PARENT: null,
            fields::EXECUTED: [],
        })
    }

    fn child(parent_label: &str, name: &str) -> Value {
        json!({
            fields::LABEL: format!("{parent_label}--{name}"),
            fields::PARENT: parent_label,
        })
    }

    #[tokio::test]
    async fn set_requires_a_label() {
        let store = MemoryStore::new();
        let err = store.set(json!({"no": "label"})).await.unwrap_err();
        assert!(matches!(err, StoreError::MissingLabel));
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get("ghost").await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn parents_and_children_split_on_marker() {
        let store = MemoryStore::new();
        store.set(parent("sst2-aaaj")).await.unwrap();
        store.set(child("sst2-aaaj", "train")).await.unwrap();
        store.set(child("sst2-aaaj", "eval")).await.unwrap();

        let parents = store.parents_like("sst2").await.unwrap();
        assert_eq!(parents, vec!["sst2-aaaj"]);
        let children = store.children_like("sst2").await.unwrap();
        assert_eq!(children.len(), 2);
        assert!(children.iter().all(|label| store.is_a_child(label)));
    }

    #[tokio::test]
    async fn get_previous_returns_executed_siblings() {
        let store = MemoryStore::new();
        let mut pipe = parent("sst2-aaaj");
        pipe[fields::EXECUTED] = json!(["sst2-aaaj--train"]);
        store.set(pipe).await.unwrap();
        store.set(child("sst2-aaaj", "train")).await.unwrap();
        store.set(child("sst2-aaaj", "eval")).await.unwrap();

        let previous = store.get_previous("sst2-aaaj--eval").await.unwrap();
        assert_eq!(previous.len(), 1);
        assert_eq!(previous[0][fields::LABEL], json!("sst2-aaaj--train"));
    }

    #[tokio::test]
    async fn remove_reports_presence() {
        let store = MemoryStore::new();
        store.set(parent("sst2-aaaj")).await.unwrap();
        assert!(store.remove("sst2-aaaj").await.unwrap());
        assert!(!store.remove("sst2-aaaj").await.unwrap());
    }

    #[tokio::test]
    async fn cache_round_trip() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("in").await.unwrap(), None);
        cache.set("in", "out").await.unwrap();
        assert_eq!(cache.get("in").await.unwrap(), Some("out".to_string()));
        cache.set("in", "out2").await.unwrap();
        assert_eq!(cache.get("in").await.unwrap(), Some("out2".to_string()));
        assert_eq!(cache.keys().await.unwrap(), vec!["in"]);
        cache.delete("in").await.unwrap();
        assert_eq!(cache.get("in").await.unwrap(), None);
    }
}
