//! Record persistence for extraction summaries
//!
//! Records are free-form JSON objects. Every saved record gets an `id` field; stores assign one
//! when the caller does not.

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};

use crate::error::CrewResult;
use crate::pipeline::run::{DocumentRef, RunId};

pub mod json_store;
pub mod memory;

pub use json_store::JsonFileStore;
pub use memory::MemoryStore;

static SLUG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").expect("slug pattern is valid"));

/// Keyed JSON record storage
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist `record`, returning its id
    async fn save(&self, record: Map<String, Value>, id: Option<String>) -> CrewResult<String>;

    async fn load(&self, id: &str) -> CrewResult<Option<Map<String, Value>>>;

    /// Ids in save order
    async fn list_ids(&self) -> CrewResult<Vec<String>>;
}

/// Base id for a new record: `<prefix>_<YYYYmmddHHMMSS>_<slug>`
///
/// The slug comes from the record's `name` field.
pub fn generate_id(prefix: &str, record: &Map<String, Value>) -> String {
    let name = record
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("record");
    let slug = SLUG_PATTERN.replace_all(name, "_");
    format!("{prefix}_{}_{slug}", Utc::now().format("%Y%m%d%H%M%S"))
}

/// Record archived after a successful document extraction
pub fn extraction_record(
    run_id: RunId,
    document_refs: &[DocumentRef],
    data: &str,
) -> Map<String, Value> {
    let name = document_refs
        .first()
        .map(|doc| doc.name.as_str())
        .unwrap_or("documents");

    let record = json!({
        "name": name,
        "run_id": run_id,
        "document_refs": document_refs
            .iter()
            .map(|doc| doc.path.display().to_string())
            .collect::<Vec<_>>(),
        "timestamp": Utc::now().to_rfc3339(),
        "data": data,
    });

    match record {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
