//! Builds STAC items from NAIP GeoTIFF tiles.

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use stac_common::Item;
use storage::{AssetStore, CatalogLoader, LoadMode};

use super::{FeedEvent, Outcome, Processor};
use crate::builder::{build_item, item_id, BuildInput, SideMetadata};
use crate::cleanup::CleanupScope;
use crate::config::{Containers, NaipSettings};
use crate::error::{Result, StacError};
use crate::locator::RasterAssetRef;
use crate::preview::render_jpeg_blocking;
use crate::serialize::{serialize, write_ndjson};

/// `extract-stac-from-naip`: locator in, `{id}.json` in the records
/// container out, optionally loaded into the catalog on the way.
pub struct NaipExtractProcessor {
    sources: Sources,
    catalog: Option<Box<dyn CatalogLoader>>,
}

/// Store access shared by the handler steps.
struct Sources {
    store: Arc<dyn AssetStore>,
    containers: Containers,
    settings: NaipSettings,
}

impl NaipExtractProcessor {
    pub fn new(
        store: Arc<dyn AssetStore>,
        catalog: Option<Box<dyn CatalogLoader>>,
        containers: Containers,
        settings: NaipSettings,
    ) -> Self {
        Self {
            sources: Sources {
                store,
                containers,
                settings,
            },
            catalog,
        }
    }

    async fn load(&mut self, item: &Item, scope: &CleanupScope) -> Result<()> {
        if let Some(catalog) = self.catalog.as_mut() {
            let path = scope.join(&format!("{}.ndjson", item.id));
            write_ndjson(&path, std::slice::from_ref(item))?;
            catalog.load_items(&path, LoadMode::Upsert).await?;
            info!(item_id = %item.id, "Loaded item into catalog");
        }
        Ok(())
    }
}

impl Sources {
    /// Upload a JPEG preview rendered from the raster. Returns the preview
    /// size, or `None` when rendering or uploading failed.
    async fn generate_preview(
        &self,
        asset: &RasterAssetRef,
        raster_path: &std::path::Path,
        preview_blob: &str,
        scope: &CleanupScope,
    ) -> Option<u64> {
        let dest = scope.join(&format!("{}.{}", asset.stem, self.settings.jpg_extension));
        let result = async {
            let path = render_jpeg_blocking(raster_path.to_path_buf(), dest).await?;
            let size = tokio::fs::metadata(&path).await?.len();
            self.store
                .upload(&self.containers.stacify, &path, preview_blob)
                .await?;
            Ok::<u64, StacError>(size)
        }
        .await;

        match result {
            Ok(size) => {
                info!(blob = preview_blob, size, "Uploaded generated preview");
                Some(size)
            }
            Err(e) => {
                warn!(blob = preview_blob, error = %e, "Preview generation failed, continuing without thumbnail");
                None
            }
        }
    }

    async fn fetch_metadata(&self, asset: &RasterAssetRef, blob: &str) -> Result<Option<SideMetadata>> {
        if !self.store.exists(&self.containers.stacify, blob).await? {
            debug!(blob, "No side metadata");
            return Ok(None);
        }
        let raw: Bytes = self.store.get(&self.containers.stacify, blob).await?;
        Ok(Some(SideMetadata {
            text: String::from_utf8_lossy(&raw).into_owned(),
            href: asset.sibling_url(blob),
        }))
    }
}

#[async_trait]
impl Processor for NaipExtractProcessor {
    fn name(&self) -> &'static str {
        "extract-stac-from-naip"
    }

    fn record_hint(&self, event: &FeedEvent) -> Option<String> {
        RasterAssetRef::parse(event.url())
            .ok()
            .map(|asset| item_id(&asset.region, &asset.file_name))
    }

    #[instrument(skip(self, scope), fields(url = %event.url()))]
    async fn run_handler(&mut self, event: &FeedEvent, scope: &CleanupScope) -> Result<Outcome> {
        let asset = RasterAssetRef::parse(event.url())?;
        let sources = &self.sources;
        let stacify = sources.containers.stacify.as_str();
        let metadata_blob = asset.metadata_blob(&sources.settings.metadata_type);
        let preview_blob = asset.preview_blob(&sources.settings.jpg_extension);

        let raster_path = sources
            .store
            .download(stacify, &asset.blob_path, scope.path())
            .await?
            .ok_or_else(|| StacError::NotFound(format!("{}/{}", stacify, asset.blob_path)))?;
        let mut bytes = tokio::fs::metadata(&raster_path).await?.len();

        let thumbnail_href = if sources.store.exists(stacify, &preview_blob).await? {
            Some(asset.sibling_url(&preview_blob))
        } else {
            let generated = sources
                .generate_preview(&asset, &raster_path, &preview_blob, scope)
                .await;
            generated.map(|size| {
                bytes += size;
                asset.sibling_url(&preview_blob)
            })
        };

        let metadata = sources.fetch_metadata(&asset, &metadata_blob).await?;
        if let Some(md) = &metadata {
            bytes += md.text.len() as u64;
        }

        let mut item = build_item(&BuildInput {
            raster_path: &raster_path,
            asset: &asset,
            metadata,
            thumbnail_href,
            collection_id: &sources.settings.collection_id,
            additional_providers: &sources.settings.additional_providers,
        })?;

        let pgstac = sources.containers.pgstac.clone();
        let record_name = format!("{}.json", item.id);
        item.set_self_href(sources.store.url(&pgstac, &record_name));

        self.load(&item, scope).await?;

        let record = serialize(&item)?;
        bytes += record.len() as u64;
        self.sources
            .store
            .put(&pgstac, &record_name, Bytes::from(record))
            .await?;

        info!(item_id = %item.id, container = %pgstac, "Published item");
        Ok(Outcome {
            record_id: Some(item.id),
            bytes,
        })
    }
}
