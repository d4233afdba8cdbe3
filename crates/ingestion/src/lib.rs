//! Raster ingestion library.
//!
//! Provides the processor runtime and the logic that turns raster assets
//! announced on a message feed into STAC catalog records.
//!
//! # Architecture
//!
//! This crate is used by the `processor` service. It handles:
//!
//! - Feed consumption with at-least-once delivery (receive, lock renewal,
//!   ack / abandon / dead-letter)
//! - Locator parsing and FGDC side-metadata parsing
//! - GeoTIFF header reading and STAC Item building
//! - NDJSON serialization and catalog loading (pgstac)
//! - Per-message scratch directories that are always cleaned up

pub mod builder;
pub mod cleanup;
pub mod config;
pub mod error;
pub mod fgdc;
pub mod locator;
pub mod metrics;
pub mod preview;
pub mod processors;
pub mod raster;
pub mod runtime;
pub mod serialize;

// Re-exports
pub use builder::{build_item, BuildInput};
pub use cleanup::CleanupScope;
pub use config::{Containers, FeedSettings, NaipSettings, ProcessorConfig};
pub use error::Result;
pub use fgdc::{parse_fgdc, FgdcValue};
pub use locator::RasterAssetRef;
pub use processors::{FeedEvent, Outcome, Processor, ProcessorKind};
pub use raster::RasterInfo;
pub use runtime::{FailurePolicy, ProcessorRuntime, Resolution};
pub use serialize::{serialize, to_ndjson_file};
