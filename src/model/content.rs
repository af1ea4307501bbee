//! File content as read from the project, with the stamp used for staleness checks

use super::FileLocation;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Encoding assumed when the project does not say otherwise
pub const DEFAULT_ENCODING: &str = "utf-8";

/// What the store remembers about the content a version was parsed from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentStamp {
    pub modified: DateTime<Utc>,
    /// Hex SHA-256 of the raw bytes
    pub content_hash: String,
    /// Combination of byte size and encoding
    pub size_fingerprint: u64,
}

impl ContentStamp {
    pub fn compute(bytes: &[u8], modified: DateTime<Utc>, encoding: &str) -> Self {
        Self {
            modified,
            content_hash: content_hash(bytes),
            size_fingerprint: size_fingerprint(bytes.len() as u64, encoding),
        }
    }

    /// Stamp for a file that could not be read
    pub fn unreadable() -> Self {
        Self {
            modified: DateTime::<Utc>::default(),
            content_hash: String::new(),
            size_fingerprint: 0,
        }
    }
}

/// Cheap facts about a file, available without reading it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileStat {
    pub modified: DateTime<Utc>,
    pub size_fingerprint: u64,
}

impl FileStat {
    pub fn new(modified: DateTime<Utc>, size: u64, encoding: &str) -> Self {
        Self {
            modified,
            size_fingerprint: size_fingerprint(size, encoding),
        }
    }
}

/// Text of a file handed to a parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub location: FileLocation,
    pub text: String,
    pub stamp: ContentStamp,
}

impl FileContent {
    pub fn new(location: FileLocation, text: impl Into<String>, modified: DateTime<Utc>) -> Self {
        let text = text.into();
        let stamp = ContentStamp::compute(text.as_bytes(), modified, DEFAULT_ENCODING);
        Self {
            location,
            text,
            stamp,
        }
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// FNV-1a over the encoding name, mixed with the size
pub fn size_fingerprint(size: u64, encoding: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in encoding.to_ascii_lowercase().bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    size.wrapping_mul(31).wrapping_add(hash)
}
