//! On-disk container for the index store
//!
//! Layout:
//!
//! ```text
//! "CIDX" | version: u32 LE | payload length: u64 LE | SHA-256(payload): 32 bytes | payload
//! ```
//!
//! The payload is JSON. Secondary indices are not persisted; they are rebuilt on load.

use super::{FileRecord, StoreError};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub const STORE_MAGIC: &[u8; 4] = b"CIDX";
pub const STORE_FORMAT_VERSION: u32 = 3;

const HEADER_LEN: usize = 4 + 4 + 8 + 32;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StorePayload {
    pub next_id: u64,
    pub records: Vec<FileRecord>,
}

/// Read a store file; `Ok(None)` when the file does not exist
pub fn read_store(path: &Path) -> Result<Option<StorePayload>, StoreError> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No index store at {}", path.display());
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    let payload = decode(path, &data)?;
    info!(
        "Loaded index store {} ({} records)",
        path.display(),
        payload.records.len()
    );
    Ok(Some(payload))
}

/// Write a store file atomically: temp file in the same directory, then rename
pub fn write_store(path: &Path, payload: &StorePayload) -> Result<(), StoreError> {
    let data = encode(payload)?;
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    let temp = path.with_extension("tmp");
    fs::write(&temp, &data)?;
    fs::rename(&temp, path)?;
    debug!(
        "Wrote index store {} ({} bytes, {} records)",
        path.display(),
        data.len(),
        payload.records.len()
    );
    Ok(())
}

pub fn encode(payload: &StorePayload) -> Result<Vec<u8>, StoreError> {
    let body = serde_json::to_vec(payload)?;
    let digest = Sha256::digest(&body);

    let mut data = Vec::with_capacity(HEADER_LEN + body.len());
    data.extend_from_slice(STORE_MAGIC);
    data.extend_from_slice(&STORE_FORMAT_VERSION.to_le_bytes());
    data.extend_from_slice(&(body.len() as u64).to_le_bytes());
    data.extend_from_slice(&digest);
    data.extend_from_slice(&body);
    Ok(data)
}

pub fn decode(path: &Path, data: &[u8]) -> Result<StorePayload, StoreError> {
    if data.len() < HEADER_LEN {
        return Err(StoreError::corrupted(
            path,
            format!("file too small: {} bytes", data.len()),
        ));
    }
    if &data[0..4] != STORE_MAGIC {
        return Err(StoreError::corrupted(
            path,
            format!("invalid magic: {:?}", &data[0..4]),
        ));
    }

    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != STORE_FORMAT_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found: version,
            supported: STORE_FORMAT_VERSION,
        });
    }

    let mut length_bytes = [0u8; 8];
    length_bytes.copy_from_slice(&data[8..16]);
    let length = u64::from_le_bytes(length_bytes) as usize;
    let body = &data[HEADER_LEN..];
    if body.len() != length {
        return Err(StoreError::corrupted(
            path,
            format!("payload length {} does not match header {}", body.len(), length),
        ));
    }

    let digest = Sha256::digest(body);
    if digest.as_slice() != &data[16..48] {
        return Err(StoreError::corrupted(path, "payload digest mismatch"));
    }

    serde_json::from_slice(body)
        .map_err(|e| StoreError::corrupted(path, format!("invalid payload: {e}")))
}
