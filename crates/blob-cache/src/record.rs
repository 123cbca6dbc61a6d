//! Stored records, their metadata and chunk manifests.

use std::collections::BTreeMap;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use grid_common::DataFormat;
use serde::{Deserialize, Serialize};

use crate::error::{BlobCacheError, BlobCacheResult};

/// Descriptive metadata stored alongside a payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobMetadata {
    pub source: String,
    pub dataset: String,
    #[serde(default)]
    pub format: Option<DataFormat>,
    pub created_at: DateTime<Utc>,
    /// Payload size in bytes; set by the cache on write.
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

impl BlobMetadata {
    pub fn new(source: impl Into<String>, dataset: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            dataset: dataset.into(),
            format: None,
            created_at: Utc::now(),
            size: 0,
            tags: BTreeMap::new(),
        }
    }

    pub fn with_format(mut self, format: DataFormat) -> Self {
        self.format = Some(format);
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// A payload read back from the cache.
#[derive(Debug, Clone)]
pub struct BlobRecord {
    pub key: String,
    pub data: Bytes,
    pub metadata: BlobMetadata,
}

/// How a payload too large for one backend entry was split.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkManifest {
    pub file_key: String,
    pub chunk_size: u64,
    pub total_chunks: u64,
    pub total_size: u64,
    pub chunk_keys: Vec<String>,
}

impl ChunkManifest {
    /// Number of chunks needed to hold `total_size` bytes.
    pub fn chunk_count(total_size: u64, chunk_size: u64) -> u64 {
        if chunk_size == 0 {
            0
        } else {
            (total_size + chunk_size - 1) / chunk_size
        }
    }

    /// Byte range `[start, end)` covered by chunk `index`.
    pub fn chunk_range(&self, index: u64) -> (u64, u64) {
        let start = index * self.chunk_size;
        let end = (start + self.chunk_size).min(self.total_size);
        (start, end)
    }

    /// Check the manifest describes a contiguous tiling of the payload.
    pub fn validate(&self) -> BlobCacheResult<()> {
        if self.chunk_size == 0 && self.total_size > 0 {
            return Err(BlobCacheError::corrupt(&self.file_key, "chunk size is zero"));
        }

        let expected = Self::chunk_count(self.total_size, self.chunk_size);
        if self.total_chunks != expected {
            return Err(BlobCacheError::corrupt(
                &self.file_key,
                format!(
                    "{} chunks recorded for {} bytes at chunk size {}, expected {}",
                    self.total_chunks, self.total_size, self.chunk_size, expected
                ),
            ));
        }

        if self.chunk_keys.len() as u64 != self.total_chunks {
            return Err(BlobCacheError::corrupt(
                &self.file_key,
                format!(
                    "{} chunk keys for {} chunks",
                    self.chunk_keys.len(),
                    self.total_chunks
                ),
            ));
        }

        Ok(())
    }
}

/// Physical layout of an entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub(crate) enum Layout {
    Inline,
    Chunked { manifest: ChunkManifest },
}

/// Contents of the `meta/{key}` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct StoredEntry {
    pub metadata: BlobMetadata,
    pub layout: Layout,
}
