//! Storage abstractions for the STAC ingestion services.
//!
//! Provides unified interfaces for:
//! - Object storage (Azure Blob, S3, local filesystem) for raster assets and records
//! - Redis Streams as the message feed processors consume
//! - PostgreSQL (pgstac) as the catalog records are loaded into

pub mod catalog;
pub mod feed;
pub mod object_store;

pub use self::object_store::{AssetStore, ObjectStorage, ObjectStorageConfig, StoreBackend};
pub use catalog::{CatalogLoader, DatabaseConfig, LoadMode, PgStacCatalog};
pub use feed::{Feed, FeedMessage, RedisFeed, RedisFeedConfig};
