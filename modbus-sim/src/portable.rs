use std::fs;
use std::path::Path;

use thiserror::Error;

use crate::point::RegisterPoint;

#[derive(Debug, Error)]
pub enum PortableError {
    #[error("malformed document: {0}")]
    Json(#[from] serde_json::Error),
    #[error("entry {index} is not a valid register point: {source}")]
    InvalidEntry {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Serialize a point collection into the portable JSON document.
pub fn to_portable(points: &[RegisterPoint]) -> Result<String, PortableError> {
    Ok(serde_json::to_string_pretty(points)?)
}

/// Parse a portable document back into a point collection.
///
/// The document must be a JSON array and every entry must have exactly the
/// register point shape; the first structurally invalid entry rejects the
/// whole document. Round trip with [`to_portable`] is lossless.
pub fn from_portable(text: &str) -> Result<Vec<RegisterPoint>, PortableError> {
    let entries: Vec<serde_json::Value> = serde_json::from_str(text)?;
    let mut points = Vec::with_capacity(entries.len());
    for (index, entry) in entries.into_iter().enumerate() {
        let point = serde_json::from_value(entry)
            .map_err(|source| PortableError::InvalidEntry { index, source })?;
        points.push(point);
    }
    Ok(points)
}

/// Read a point collection from a JSON file.
pub fn import_file(path: impl AsRef<Path>) -> Result<Vec<RegisterPoint>, PortableError> {
    let text = fs::read_to_string(path)?;
    from_portable(&text)
}

/// Write a point collection to a JSON file.
pub fn export_file(path: impl AsRef<Path>, points: &[RegisterPoint]) -> Result<(), PortableError> {
    fs::write(path, to_portable(points)?)?;
    Ok(())
}
