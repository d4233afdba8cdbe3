//! Loads STAC item documents into the catalog.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

use storage::object_store::basename;
use storage::{AssetStore, CatalogLoader, LoadMode};

use super::{FeedEvent, Outcome, Processor};
use crate::cleanup::CleanupScope;
use crate::error::{Result, StacError};
use crate::serialize::to_ndjson_file;

/// `ingest-stac-item`: fetch `{basename(url)}` from the records container
/// and load it as a one-line NDJSON file.
pub struct ItemIngestProcessor {
    store: Arc<dyn AssetStore>,
    catalog: Box<dyn CatalogLoader>,
    container: String,
    mode: LoadMode,
}

impl ItemIngestProcessor {
    pub fn new(
        store: Arc<dyn AssetStore>,
        catalog: Box<dyn CatalogLoader>,
        container: String,
        mode: LoadMode,
    ) -> Self {
        Self {
            store,
            catalog,
            container,
            mode,
        }
    }
}

#[async_trait]
impl Processor for ItemIngestProcessor {
    fn name(&self) -> &'static str {
        "ingest-stac-item"
    }

    fn record_hint(&self, event: &FeedEvent) -> Option<String> {
        Path::new(basename(event.url()))
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
    }

    #[instrument(skip(self, scope), fields(url = %event.url()))]
    async fn run_handler(&mut self, event: &FeedEvent, scope: &CleanupScope) -> Result<Outcome> {
        let name = basename(event.url());
        let json_path = self
            .store
            .download(&self.container, name, scope.path())
            .await?
            .ok_or_else(|| {
                StacError::NotFound(format!("{}/{}", self.container, name))
            })?;
        let bytes = tokio::fs::metadata(&json_path).await?.len();

        let ndjson_path = to_ndjson_file(&json_path)?;
        let loaded = self.catalog.load_items(&ndjson_path, self.mode).await?;

        info!(name, loaded, mode = %self.mode, "Loaded item");
        Ok(Outcome {
            record_id: self.record_hint(event),
            bytes,
        })
    }
}
