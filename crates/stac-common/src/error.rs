//! Error taxonomy for the ingestion pipeline.
//!
//! Every failure that can reach the processor runtime is one of these
//! variants. The runtime only needs [`StacError::is_retryable`] to decide
//! between abandoning and dead-lettering a message.

use thiserror::Error;

/// Result type alias using StacError.
pub type StacResult<T> = Result<T, StacError>;

/// Primary error type for ingestion operations.
#[derive(Debug, Error)]
pub enum StacError {
    // === Transport Errors ===
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Object store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    // === Input Errors ===
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    #[error("Raster asset unreadable: {0}")]
    AssetUnreadable(String),

    #[error("Failed to parse side metadata: {0}")]
    MetadataParse(String),

    #[error("Could not derive footprint: {0}")]
    Geometry(String),

    // === Catalog Errors ===
    #[error("Catalog load rejected: {reason}")]
    LoadRejected { reason: String, retryable: bool },

    // === Infrastructure Errors ===
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StacError {
    /// Whether redelivering the message could make the failure go away.
    ///
    /// Bad data (payloads, locators, rasters, metadata) never heals on its
    /// own; connectivity problems usually do.
    pub fn is_retryable(&self) -> bool {
        match self {
            StacError::Transport(_) | StacError::StoreUnavailable(_) | StacError::Io(_) => true,
            StacError::LoadRejected { retryable, .. } => *retryable,
            StacError::NotFound(_)
            | StacError::MalformedInput(_)
            | StacError::AssetUnreadable(_)
            | StacError::MetadataParse(_)
            | StacError::Geometry(_)
            | StacError::Config(_) => false,
        }
    }

    /// Short, stable label used for metrics and structured logs.
    pub fn kind(&self) -> &'static str {
        match self {
            StacError::Transport(_) => "transport",
            StacError::StoreUnavailable(_) => "store_unavailable",
            StacError::NotFound(_) => "not_found",
            StacError::MalformedInput(_) => "malformed_input",
            StacError::AssetUnreadable(_) => "asset_unreadable",
            StacError::MetadataParse(_) => "metadata_parse",
            StacError::Geometry(_) => "geometry",
            StacError::LoadRejected { .. } => "load_rejected",
            StacError::Config(_) => "config",
            StacError::Io(_) => "io",
        }
    }

    /// Shorthand for a rejected load that may succeed on retry.
    pub fn load_retryable(reason: impl Into<String>) -> Self {
        StacError::LoadRejected {
            reason: reason.into(),
            retryable: true,
        }
    }

    /// Shorthand for a rejected load that will fail again on retry.
    pub fn load_permanent(reason: impl Into<String>) -> Self {
        StacError::LoadRejected {
            reason: reason.into(),
            retryable: false,
        }
    }
}

impl From<serde_json::Error> for StacError {
    fn from(err: serde_json::Error) -> Self {
        StacError::MalformedInput(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(StacError::Transport("redis down".into()).is_retryable());
        assert!(StacError::StoreUnavailable("timeout".into()).is_retryable());
        assert!(StacError::load_retryable("connection reset").is_retryable());

        assert!(!StacError::MalformedInput("bad payload".into()).is_retryable());
        assert!(!StacError::NotFound("a.json".into()).is_retryable());
        assert!(!StacError::load_permanent("duplicate key").is_retryable());
        assert!(!StacError::Geometry("unknown epsg".into()).is_retryable());
    }

    #[test]
    fn test_json_errors_are_malformed_input() {
        let err: StacError = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert_eq!(err.kind(), "malformed_input");
    }
}
