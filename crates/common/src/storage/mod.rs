//! Record persistence
//!
//! Provides:
//! - A key/records storage contract (`save`, `append`, `load`)
//! - Column-union semantics on append: missing fields become `null`
//! - A JSON file backend and an in-memory backend

use crate::errors::{AppError, Result};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap};
use std::path::{Component, Path, PathBuf};
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

/// One stored row: column name to value
pub type Record = Map<String, Value>;

/// Durable storage of record sets addressed by key
#[async_trait]
pub trait Storage: Send + Sync {
    /// Replace the records stored under `key`
    async fn save(&self, records: &[Record], key: &str) -> Result<()>;

    /// Add records to `key`, creating it when absent.
    ///
    /// Differing fields never fail: the stored set is widened to the union of
    /// columns and absent cells are filled with `null`.
    async fn append(&self, records: &[Record], key: &str) -> Result<()>;

    /// Load the records stored under `key`
    async fn load(&self, key: &str) -> Result<Option<Vec<Record>>>;
}

/// Concatenate two record sets and widen every row to the union of columns
pub fn union_columns(existing: Vec<Record>, new: &[Record]) -> Vec<Record> {
    let columns: BTreeSet<String> = existing
        .iter()
        .chain(new.iter())
        .flat_map(|r| r.keys().cloned())
        .collect();

    existing
        .into_iter()
        .chain(new.iter().cloned())
        .map(|mut record| {
            for column in &columns {
                if !record.contains_key(column) {
                    record.insert(column.clone(), Value::Null);
                }
            }
            record
        })
        .collect()
}

/// Storage backed by one JSON document per key under a data directory
pub struct JsonStorage {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStorage {
    /// Create a storage rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Resolve a key to its file path, rejecting keys that escape the root
    fn path_for(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));

        if !valid {
            return Err(AppError::Validation {
                message: format!("Invalid storage key '{}'", key),
                field: Some("key".to_string()),
            });
        }

        Ok(self.root.join(format!("{}.json", key)))
    }

    async fn read(&self, path: &Path, key: &str) -> Result<Option<Vec<Record>>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => {
                let records: Vec<Record> =
                    serde_json::from_slice(&bytes).map_err(|e| AppError::Storage {
                        key: key.to_string(),
                        message: format!("Failed to parse stored records: {}", e),
                    })?;
                Ok(Some(records))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, path: &Path, records: &[Record]) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(records)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl Storage for JsonStorage {
    async fn save(&self, records: &[Record], key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock().await;

        self.write(&path, records).await?;
        debug!(key = %key, rows = records.len(), "Records saved");
        Ok(())
    }

    async fn append(&self, records: &[Record], key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        let _guard = self.write_lock.lock().await;

        let combined = match self.read(&path, key).await? {
            Some(existing) => {
                debug!(key = %key, existing = existing.len(), new = records.len(), "Appending records");
                union_columns(existing, records)
            }
            None => union_columns(Vec::new(), records),
        };

        self.write(&path, &combined).await
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<Record>>> {
        let path = self.path_for(key)?;
        self.read(&path, key).await
    }
}

/// In-process storage, mainly for tests
#[derive(Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, Vec<Record>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keys currently stored, sorted
    pub async fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn save(&self, records: &[Record], key: &str) -> Result<()> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), records.to_vec());
        Ok(())
    }

    async fn append(&self, records: &[Record], key: &str) -> Result<()> {
        let mut entries = self.entries.write().await;
        let existing = entries.remove(key).unwrap_or_default();
        entries.insert(key.to_string(), union_columns(existing, records));
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<Vec<Record>>> {
        Ok(self.entries.read().await.get(key).cloned())
    }
}

/// Storage key builder helpers
pub mod keys {
    /// Make an identifier safe to use as a single path segment
    pub fn sanitize(segment: &str) -> String {
        segment
            .chars()
            .map(|c| match c {
                'a'..='z' | 'A'..='Z' | '0'..='9' | '.' | '-' | '_' => c,
                _ => '_',
            })
            .collect::<String>()
            .trim_start_matches('.')
            .to_string()
    }

    /// Metadata of one paper
    pub fn paper(paper_id: &str) -> String {
        format!("papers/{}", sanitize(paper_id))
    }

    /// Aggregate metadata of every fetched paper
    pub fn all_papers() -> String {
        "papers/all_papers".to_string()
    }

    /// Source listing of one paper
    pub fn source(paper_id: &str) -> String {
        format!("sources/{}_source", sanitize(paper_id))
    }

    /// Metadata combined with LaTeX content
    pub fn combined(paper_id: &str) -> String {
        format!("combined/{}_complete", sanitize(paper_id))
    }

    /// Results of one search query
    pub fn search(query: &str, timestamp: i64) -> String {
        format!("search/{}_{}", sanitize(query), timestamp)
    }

    /// Node records of a named graph
    pub fn graph_nodes(name: &str) -> String {
        format!("graphs/{}_nodes", sanitize(name))
    }

    /// Edge records of a named graph
    pub fn graph_edges(name: &str) -> String {
        format!("graphs/{}_edges", sanitize(name))
    }

    /// Error records of a named graph
    pub fn graph_errors(name: &str) -> String {
        format!("graphs/{}_errors", sanitize(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_union_columns_fills_nulls() {
        let existing = vec![record(json!({"id": "a", "title": "First"}))];
        let new = vec![record(json!({"id": "b", "doi": "10.1/x"}))];

        let merged = union_columns(existing, &new);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0]["doi"], Value::Null);
        assert_eq!(merged[1]["title"], Value::Null);
        assert_eq!(merged[1]["doi"], json!("10.1/x"));
    }

    #[test]
    fn test_key_builders() {
        assert_eq!(keys::paper("2103.00020"), "papers/2103.00020");
        assert_eq!(keys::paper("hep-th/9901001"), "papers/hep-th_9901001");
        assert_eq!(keys::source("math.GT/0309136"), "sources/math.GT_0309136_source");
        assert!(keys::search("graph neural nets", 17).starts_with("search/graph_neural_nets"));
        assert_eq!(keys::graph_nodes("run"), "graphs/run_nodes");
    }

    #[tokio::test]
    async fn test_json_storage_append_creates_and_widens() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path());
        let key = keys::all_papers();

        assert!(storage.load(&key).await.unwrap().is_none());

        storage
            .append(&[record(json!({"id": "a", "title": "First"}))], &key)
            .await
            .unwrap();
        storage
            .append(&[record(json!({"id": "b", "comment": "5 pages"}))], &key)
            .await
            .unwrap();

        let rows = storage.load(&key).await.unwrap().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["comment"], Value::Null);
        assert_eq!(rows[1]["title"], Value::Null);
        assert!(dir.path().join("papers/all_papers.json").exists());
    }

    #[tokio::test]
    async fn test_json_storage_save_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path());

        storage.save(&[record(json!({"id": "a"}))], "papers/a").await.unwrap();
        storage.save(&[record(json!({"id": "b"}))], "papers/a").await.unwrap();

        let rows = storage.load("papers/a").await.unwrap().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["id"], json!("b"));
    }

    #[tokio::test]
    async fn test_json_storage_rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let storage = JsonStorage::new(dir.path());

        tokio_test::assert_err!(storage.save(&[], "../outside").await);
        tokio_test::assert_err!(storage.load("/etc/passwd").await);
        tokio_test::assert_ok!(storage.save(&[], "graphs/empty").await);
    }

    #[tokio::test]
    async fn test_memory_storage_append() {
        let storage = MemoryStorage::new();
        storage.append(&[record(json!({"a": 1}))], "k").await.unwrap();
        storage.append(&[record(json!({"b": 2}))], "k").await.unwrap();

        let rows = storage.load("k").await.unwrap().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["b"], Value::Null);
        assert_eq!(storage.keys().await, vec!["k".to_string()]);
    }
}
