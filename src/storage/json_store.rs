//! One pretty-printed JSON file per record plus an `index.json`

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use super::{generate_id, RecordStore};
use crate::error::{CrewError, CrewResult};

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct Index {
    records: Vec<IndexEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexEntry {
    id: String,
    timestamp: String,
}

/// Directory-backed record store
pub struct JsonFileStore {
    dir: PathBuf,
    prefix: String,
    // Serializes index read-modify-write cycles
    index_lock: Mutex<()>,
}

fn storage_error(e: impl std::fmt::Display) -> CrewError {
    CrewError::collaborator_unavailable("storage", e.to_string())
}

impl JsonFileStore {
    /// Open (creating if needed) a store in `dir`; generated ids start with `prefix`
    pub async fn open(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> CrewResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(storage_error)?;

        let store = Self {
            dir,
            prefix: prefix.into(),
            index_lock: Mutex::new(()),
        };
        if tokio::fs::metadata(store.index_path()).await.is_err() {
            store.write_index(&Index::default()).await?;
        }
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    async fn read_index(&self) -> CrewResult<Index> {
        let content = tokio::fs::read_to_string(self.index_path())
            .await
            .map_err(storage_error)?;
        serde_json::from_str(&content).map_err(storage_error)
    }

    async fn write_index(&self, index: &Index) -> CrewResult<()> {
        let content = serde_json::to_string_pretty(index).map_err(storage_error)?;
        tokio::fs::write(self.index_path(), content)
            .await
            .map_err(storage_error)
    }

    /// First of `base`, `base_2`, `base_3`, ... with no file on disk
    async fn unused_id(&self, base: String) -> String {
        let mut candidate = base.clone();
        let mut suffix = 2;
        while tokio::fs::metadata(self.record_path(&candidate)).await.is_ok() {
            candidate = format!("{base}_{suffix}");
            suffix += 1;
        }
        candidate
    }
}

/// Ids become file names, so they may not escape the store directory
fn validate_id(id: &str) -> CrewResult<()> {
    if id.is_empty() || id.contains(['/', '\\']) || id.starts_with('.') || id == "index" {
        return Err(CrewError::invalid_input(format!("invalid record id: {id}")));
    }
    Ok(())
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn save(&self, mut record: Map<String, Value>, id: Option<String>) -> CrewResult<String> {
        let _guard = self.index_lock.lock().await;

        let id = match id {
            Some(id) => {
                validate_id(&id)?;
                id
            }
            None => self.unused_id(generate_id(&self.prefix, &record)).await,
        };
        record.insert("id".to_string(), Value::String(id.clone()));

        let content = serde_json::to_string_pretty(&record).map_err(storage_error)?;
        tokio::fs::write(self.record_path(&id), content)
            .await
            .map_err(storage_error)?;

        let mut index = self.read_index().await?;
        if !index.records.iter().any(|entry| entry.id == id) {
            index.records.push(IndexEntry {
                id: id.clone(),
                timestamp: chrono::Utc::now().to_rfc3339(),
            });
            self.write_index(&index).await?;
        }

        debug!(record_id = %id, dir = %self.dir.display(), "Record saved");
        Ok(id)
    }

    async fn load(&self, id: &str) -> CrewResult<Option<Map<String, Value>>> {
        validate_id(id)?;
        let content = match tokio::fs::read_to_string(self.record_path(id)).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error(e)),
        };
        serde_json::from_str(&content).map(Some).map_err(storage_error)
    }

    async fn list_ids(&self) -> CrewResult<Vec<String>> {
        let _guard = self.index_lock.lock().await;
        Ok(self
            .read_index()
            .await?
            .records
            .into_iter()
            .map(|entry| entry.id)
            .collect())
    }
}
