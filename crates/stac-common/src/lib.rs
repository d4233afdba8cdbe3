//! Common types and utilities shared across the STAC ingestion crates.

pub mod bbox;
pub mod collection;
pub mod error;
pub mod item;

pub use bbox::BoundingBox;
pub use collection::CollectionDocument;
pub use error::{StacError, StacResult};
pub use item::{Asset, Band, Geometry, Item, Link, Provider, RasterBand};
