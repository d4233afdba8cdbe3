//! In-memory catalog loader.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use stac_common::{CollectionDocument, StacError, StacResult};
use storage::catalog::read_ndjson;
use storage::{CatalogLoader, LoadMode};

#[derive(Debug, Default)]
struct CatalogState {
    items: BTreeMap<String, Value>,
    collections: BTreeMap<String, Value>,
    loads: usize,
    failure: Option<fn() -> StacError>,
}

/// Catalog that keeps records in memory and enforces insert uniqueness
/// like pgstac does.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    state: Arc<Mutex<CatalogState>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, CatalogState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make every call fail with the produced error until cleared.
    pub fn fail_with(&self, failure: Option<fn() -> StacError>) {
        self.state().failure = failure;
    }

    pub fn item(&self, id: &str) -> Option<Value> {
        self.state().items.get(id).cloned()
    }

    pub fn item_ids(&self) -> Vec<String> {
        self.state().items.keys().cloned().collect()
    }

    pub fn collection(&self, id: &str) -> Option<Value> {
        self.state().collections.get(id).cloned()
    }

    /// Successful load calls so far.
    pub fn loads(&self) -> usize {
        self.state().loads
    }
}

fn record_id(record: &Value) -> StacResult<String> {
    record
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| StacError::load_permanent("record has no id"))
}

#[async_trait]
impl CatalogLoader for MemoryCatalog {
    async fn load_items(&mut self, ndjson_path: &Path, mode: LoadMode) -> StacResult<u64> {
        let records = read_ndjson(ndjson_path)?;
        let mut state = self.state();
        if let Some(failure) = state.failure {
            return Err(failure());
        }

        // All or nothing, like the transaction the real loader uses.
        let mut staged = Vec::with_capacity(records.len());
        for record in records {
            let id = record_id(&record)?;
            if mode == LoadMode::Insert && state.items.contains_key(&id) {
                return Err(StacError::load_permanent(format!(
                    "duplicate key value violates unique constraint: {}",
                    id
                )));
            }
            staged.push((id, record));
        }

        let count = staged.len() as u64;
        state.items.extend(staged);
        state.loads += 1;
        Ok(count)
    }

    async fn create_collection(&mut self, collection: &CollectionDocument) -> StacResult<()> {
        let mut state = self.state();
        if let Some(failure) = state.failure {
            return Err(failure());
        }
        if state.collections.contains_key(collection.id()) {
            return Err(StacError::load_permanent(format!(
                "collection {} already exists",
                collection.id()
            )));
        }
        state
            .collections
            .insert(collection.id().to_string(), collection.body().clone());
        state.loads += 1;
        Ok(())
    }
}
