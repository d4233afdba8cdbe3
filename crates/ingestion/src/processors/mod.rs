//! Processor kinds.
//!
//! Each kind turns one feed event into catalog side effects. The set of
//! kinds is fixed at compile time; [`ProcessorKind::ALL`] is the registry.

mod collection;
mod item;
mod naip;

pub use collection::CollectionIngestProcessor;
pub use item::ItemIngestProcessor;
pub use naip::NaipExtractProcessor;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use storage::{AssetStore, CatalogLoader};

use crate::cleanup::CleanupScope;
use crate::config::ProcessorConfig;
use crate::error::{Result, StacError};
use crate::metrics::{self as stac_metrics, MessageMetrics};

/// Event announcing an asset: `{"data": {"url": "<locator>"}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedEvent {
    pub data: EventData,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub url: String,
}

impl FeedEvent {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            data: EventData { url: url.into() },
        }
    }

    /// Decode a message payload.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let event: FeedEvent = serde_json::from_slice(payload)
            .map_err(|e| StacError::MalformedInput(format!("undecodable event: {}", e)))?;
        if event.data.url.trim().is_empty() {
            return Err(StacError::MalformedInput("event has an empty url".to_string()));
        }
        Ok(event)
    }

    pub fn url(&self) -> &str {
        &self.data.url
    }

    pub fn to_payload(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// What a successful handler produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    /// Id of the item or collection written
    pub record_id: Option<String>,
    /// Bytes moved through the asset store
    pub bytes: u64,
}

/// A processor kind's message handler.
#[async_trait]
pub trait Processor: Send {
    /// Registered name.
    fn name(&self) -> &'static str;

    fn register_metrics(&self) {
        stac_metrics::describe();
    }

    fn send_metrics(&self, fields: &MessageMetrics) {
        stac_metrics::record_message(self.name(), fields);
    }

    /// Best-known record id for an event, used when reporting failures.
    fn record_hint(&self, _event: &FeedEvent) -> Option<String> {
        None
    }

    /// Handle one event. Intermediate files must stay inside `scope`.
    async fn run_handler(&mut self, event: &FeedEvent, scope: &CleanupScope) -> Result<Outcome>;
}

/// Registered processor kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessorKind {
    IngestItem,
    IngestCollection,
    ExtractNaip,
}

impl ProcessorKind {
    pub const ALL: [ProcessorKind; 3] = [
        ProcessorKind::IngestItem,
        ProcessorKind::IngestCollection,
        ProcessorKind::ExtractNaip,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ProcessorKind::IngestItem => "ingest-stac-item",
            ProcessorKind::IngestCollection => "ingest-stac-collection",
            ProcessorKind::ExtractNaip => "extract-stac-from-naip",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ProcessorKind::IngestItem => "Load STAC item JSON documents into pgstac",
            ProcessorKind::IngestCollection => "Create STAC collections in pgstac",
            ProcessorKind::ExtractNaip => "Build STAC items from NAIP GeoTIFF tiles",
        }
    }

    /// Whether the kind cannot run without a catalog connection.
    pub fn requires_catalog(&self) -> bool {
        !matches!(self, ProcessorKind::ExtractNaip)
    }

    /// Instantiate the handler for one worker.
    pub fn build(
        &self,
        config: &ProcessorConfig,
        store: Arc<dyn AssetStore>,
        catalog: Option<Box<dyn CatalogLoader>>,
    ) -> Result<Box<dyn Processor>> {
        let require = |catalog: Option<Box<dyn CatalogLoader>>| {
            catalog.ok_or_else(|| {
                StacError::Config(format!("{} requires a catalog connection", self.name()))
            })
        };

        Ok(match self {
            ProcessorKind::IngestItem => Box::new(ItemIngestProcessor::new(
                store,
                require(catalog)?,
                config.containers.pgstac.clone(),
                config.load_mode,
            )),
            ProcessorKind::IngestCollection => Box::new(CollectionIngestProcessor::new(
                store,
                require(catalog)?,
                config.containers.staccollection.clone(),
            )),
            ProcessorKind::ExtractNaip => Box::new(NaipExtractProcessor::new(
                store,
                catalog,
                config.containers.clone(),
                config.naip.clone(),
            )),
        })
    }
}

impl fmt::Display for ProcessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProcessorKind {
    type Err = StacError;

    fn from_str(s: &str) -> Result<Self> {
        ProcessorKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| {
                let known: Vec<&str> = ProcessorKind::ALL.iter().map(|k| k.name()).collect();
                StacError::Config(format!(
                    "unknown processor '{}', expected one of: {}",
                    s,
                    known.join(", ")
                ))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_names_round_trip() {
        for kind in ProcessorKind::ALL {
            assert_eq!(kind.name().parse::<ProcessorKind>().unwrap(), kind);
        }
        assert!(matches!(
            "ingest-everything".parse::<ProcessorKind>(),
            Err(StacError::Config(_))
        ));
    }

    #[test]
    fn test_decode_event() {
        let event = FeedEvent::decode(br#"{"data": {"url": "https://a/b/c.tif"}, "id": "x"}"#).unwrap();
        assert_eq!(event.url(), "https://a/b/c.tif");
        assert_eq!(FeedEvent::decode(&event.to_payload().unwrap()).unwrap(), event);
    }

    #[test]
    fn test_decode_rejects_bad_payloads() {
        let payloads: [&[u8]; 4] = [
            b"not json",
            br#"{"url": "https://a/b.tif"}"#,
            br#"{"data": {}}"#,
            br#"{"data": {"url": "  "}}"#,
        ];
        for payload in payloads {
            assert!(matches!(
                FeedEvent::decode(payload),
                Err(StacError::MalformedInput(_))
            ));
        }
    }
}
