//! Creates STAC collections in the catalog.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

use stac_common::CollectionDocument;
use storage::object_store::basename;
use storage::{AssetStore, CatalogLoader};

use super::{FeedEvent, Outcome, Processor};
use crate::cleanup::CleanupScope;
use crate::error::{Result, StacError};

/// `ingest-stac-collection`: fetch a collection document and create it.
///
/// Creation is not idempotent; a redelivered collection is rejected by the
/// catalog as a duplicate and dead-lettered.
pub struct CollectionIngestProcessor {
    store: Arc<dyn AssetStore>,
    catalog: Box<dyn CatalogLoader>,
    container: String,
}

impl CollectionIngestProcessor {
    pub fn new(store: Arc<dyn AssetStore>, catalog: Box<dyn CatalogLoader>, container: String) -> Self {
        Self {
            store,
            catalog,
            container,
        }
    }
}

#[async_trait]
impl Processor for CollectionIngestProcessor {
    fn name(&self) -> &'static str {
        "ingest-stac-collection"
    }

    #[instrument(skip(self, scope), fields(url = %event.url()))]
    async fn run_handler(&mut self, event: &FeedEvent, scope: &CleanupScope) -> Result<Outcome> {
        let name = basename(event.url());
        let path = self
            .store
            .download(&self.container, name, scope.path())
            .await?
            .ok_or_else(|| {
                StacError::NotFound(format!("{}/{}", self.container, name))
            })?;

        let raw = tokio::fs::read(&path).await?;
        let collection = CollectionDocument::from_slice(&raw)?;
        self.catalog.create_collection(&collection).await?;

        info!(collection = collection.id(), "Created collection");
        Ok(Outcome {
            record_id: Some(collection.id().to_string()),
            bytes: raw.len() as u64,
        })
    }
}
