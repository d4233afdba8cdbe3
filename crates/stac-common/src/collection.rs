//! STAC Collection documents.
//!
//! Collections are authored out-of-band and loaded verbatim; the pipeline
//! only needs to check that a document is a JSON object with an id.

use serde_json::Value;

use crate::error::{StacError, StacResult};

/// A collection document as it will be handed to the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionDocument {
    id: String,
    body: Value,
}

impl CollectionDocument {
    /// Parse and validate a collection document.
    pub fn from_slice(data: &[u8]) -> StacResult<Self> {
        let body: Value = serde_json::from_slice(data)?;
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| StacError::MalformedInput("collection document has no id".into()))?
            .to_string();
        Ok(Self { id, body })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn body(&self) -> &Value {
        &self.body
    }
}
