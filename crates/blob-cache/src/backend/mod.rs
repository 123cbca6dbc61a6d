//! Storage backends for the blob cache.
//!
//! A backend is a flat key/value store with a per-entry size limit. Keys use
//! `/` as a segment separator; `list` matches whole leading segments.

mod memory;
mod object_store;

pub use self::memory::MemoryBackend;
pub use self::object_store::ObjectStoreBackend;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::BlobCacheResult;

#[async_trait]
pub trait BlobBackend: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Largest payload a single `write` accepts.
    fn max_entry_size(&self) -> usize;

    /// Read an entry, `None` if absent.
    async fn read(&self, key: &str) -> BlobCacheResult<Option<Bytes>>;

    async fn write(&self, key: &str, data: Bytes) -> BlobCacheResult<()>;

    /// Remove an entry. Removing an absent key is not an error.
    async fn remove(&self, key: &str) -> BlobCacheResult<()>;

    /// Keys equal to `prefix` or below it (`prefix/...`).
    async fn list(&self, prefix: &str) -> BlobCacheResult<Vec<String>>;

    /// Remove every entry.
    async fn clear(&self) -> BlobCacheResult<()>;
}

pub(crate) fn under_prefix(key: &str, prefix: &str) -> bool {
    prefix.is_empty()
        || key == prefix
        || (key.starts_with(prefix) && key.as_bytes().get(prefix.len()) == Some(&b'/'))
}
