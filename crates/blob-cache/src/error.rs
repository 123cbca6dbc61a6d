//! Error types for the blob cache.

use thiserror::Error;

pub type BlobCacheResult<T> = Result<T, BlobCacheError>;

#[derive(Debug, Error)]
pub enum BlobCacheError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Entry of {size} bytes exceeds the backend limit of {limit} bytes")]
    EntryTooLarge { size: usize, limit: usize },

    #[error("Invalid cache key '{0}'")]
    InvalidKey(String),

    #[error("Chunk {index} of '{key}' is missing")]
    MissingChunk { key: String, index: u64 },

    #[error("Corrupt entry '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Source stream failed: {0}")]
    Stream(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl BlobCacheError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn corrupt(key: &str, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}
