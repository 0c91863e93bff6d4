//! In-process record store

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::RwLock;

use super::{generate_id, RecordStore};
use crate::error::{CrewError, CrewResult};

/// Records held in memory, in save order
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<Vec<(String, Map<String, Value>)>>,
    fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every `save` fails
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn save(&self, mut record: Map<String, Value>, id: Option<String>) -> CrewResult<String> {
        if self.fail_writes {
            return Err(CrewError::collaborator_unavailable("storage", "writes disabled"));
        }

        let mut records = self.records.write().await;
        let base = id.unwrap_or_else(|| generate_id("record", &record));
        let mut id = base.clone();
        let mut suffix = 2;
        while records.iter().any(|(existing, _)| *existing == id) {
            id = format!("{base}_{suffix}");
            suffix += 1;
        }

        record.insert("id".to_string(), Value::String(id.clone()));
        records.push((id.clone(), record));
        Ok(id)
    }

    async fn load(&self, id: &str) -> CrewResult<Option<Map<String, Value>>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .find(|(existing, _)| existing == id)
            .map(|(_, record)| record.clone()))
    }

    async fn list_ids(&self) -> CrewResult<Vec<String>> {
        Ok(self
            .records
            .read()
            .await
            .iter()
            .map(|(id, _)| id.clone())
            .collect())
    }
}
