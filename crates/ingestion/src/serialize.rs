//! NDJSON record serialization.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::error::{Result, StacError};

/// Compact single-line JSON followed by a newline.
pub fn serialize<T: Serialize + ?Sized>(record: &T) -> Result<String> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    Ok(line)
}

/// Rewrite a downloaded JSON document as a one-line `.ndjson` file next to it.
pub fn to_ndjson_file(json_path: &Path) -> Result<PathBuf> {
    let text = std::fs::read_to_string(json_path)?;
    let value: serde_json::Value = serde_json::from_str(&text).map_err(|e| {
        StacError::MalformedInput(format!("{} is not valid JSON: {}", json_path.display(), e))
    })?;

    let ndjson_path = json_path.with_extension("ndjson");
    std::fs::write(&ndjson_path, serialize(&value)?)?;
    Ok(ndjson_path)
}

/// Write records to an NDJSON file, one per line.
pub fn write_ndjson<T: Serialize>(path: &Path, records: &[T]) -> Result<()> {
    let mut out = String::new();
    for record in records {
        out.push_str(&serialize(record)?);
    }
    std::fs::write(path, out)?;
    Ok(())
}
