//! Raw upload loading and delimited-text parsing.

use crate::error::DataGateError;
use crate::models::{CsvMetadata, StorageMode};
use crate::Result;
use async_trait::async_trait;
use base64::Engine;
use tracing::debug;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Fetches uploaded objects from external storage.
#[async_trait]
pub trait ObjectStore: Send + Sync + std::fmt::Debug {
    /// Returns the bytes stored under `key`, in `bucket` or the store's
    /// default bucket.
    ///
    /// # Errors
    /// Returns error if the object cannot be fetched
    async fn get(&self, bucket: Option<&str>, key: &str) -> Result<Vec<u8>>;
}

/// Loads the raw bytes of an upload from its storage mode.
///
/// # Errors
/// Returns a materialization error when the payload is missing, undecodable,
/// or unreadable
pub async fn load_bytes(
    metadata: &CsvMetadata,
    object_store: Option<&dyn ObjectStore>,
) -> Result<Vec<u8>> {
    let bytes = match metadata.storage {
        StorageMode::InlineBase64 => {
            let encoded = metadata
                .inline_data
                .as_deref()
                .ok_or_else(|| DataGateError::materialization("Inline upload has no data"))?;
            let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
            base64::engine::general_purpose::STANDARD
                .decode(compact)
                .map_err(|e| DataGateError::materialization_failed("Inline upload is not valid base64", e))?
        }
        StorageMode::Filesystem => {
            let path = metadata
                .path
                .as_deref()
                .ok_or_else(|| DataGateError::materialization("Filesystem upload has no path"))?;
            tokio::fs::read(path).await.map_err(|e| {
                DataGateError::materialization_failed(
                    format!("Failed to read upload at {}", path.display()),
                    e,
                )
            })?
        }
        StorageMode::ObjectStore => {
            let key = metadata
                .object_key
                .as_deref()
                .ok_or_else(|| DataGateError::materialization("Object-store upload has no key"))?;
            let store = object_store.ok_or_else(|| {
                DataGateError::materialization("No object store is configured for uploads")
            })?;
            store
                .get(metadata.bucket.as_deref(), key)
                .await
                .map_err(|e| DataGateError::materialization_failed("Failed to fetch upload", e))?
        }
    };

    debug!(bytes = bytes.len(), storage = ?metadata.storage, "Loaded upload");
    Ok(bytes)
}

/// Parses delimited text into records. Ragged rows are kept as-is, fully
/// empty rows are dropped, and a leading UTF-8 BOM is ignored.
///
/// # Errors
/// Returns a materialization error for malformed input
pub fn parse_delimited(bytes: &[u8], delimiter: u8) -> Result<Vec<Vec<String>>> {
    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(body);

    let mut records = Vec::new();
    let mut record = csv::ByteRecord::new();
    loop {
        match reader.read_byte_record(&mut record) {
            Ok(false) => break,
            Ok(true) => {
                let cells: Vec<String> = record
                    .iter()
                    .map(|field| String::from_utf8_lossy(field).into_owned())
                    .collect();
                if cells.iter().any(|c| !c.trim().is_empty()) || records.is_empty() {
                    records.push(cells);
                }
            }
            Err(e) => {
                let line = e.position().map_or(0, |p| p.line());
                return Err(DataGateError::materialization_failed(
                    format!("Malformed delimited data near line {}", line),
                    e,
                ));
            }
        }
    }

    Ok(records)
}
