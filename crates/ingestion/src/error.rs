//! Error helpers for the ingestion crate.
//!
//! All fallible operations report [`StacError`]; this module only adds the
//! crate-level alias and conversions for third-party errors.

pub use stac_common::StacError;

/// Result type for ingestion operations.
pub type Result<T> = std::result::Result<T, StacError>;

pub(crate) fn unreadable(what: impl std::fmt::Display, err: impl std::fmt::Display) -> StacError {
    StacError::AssetUnreadable(format!("{}: {}", what, err))
}

pub(crate) fn geometry(err: projection::ProjectionError) -> StacError {
    StacError::Geometry(err.to_string())
}
