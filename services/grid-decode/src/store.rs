//! Blob cache construction from flags and environment.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use blob_cache::{BlobCacheConfig, ObjectStoreBackend, ObjectStoreBackendConfig, RawBlobCache};

/// Open the cache under `cache_dir`, or the store selected by `BLOB_STORE`.
pub fn open_cache(cache_dir: Option<&Path>) -> Result<Arc<RawBlobCache>> {
    let store_config = ObjectStoreBackendConfig::from_env();

    let backend = match cache_dir {
        Some(dir) => ObjectStoreBackend::local(dir)
            .with_context(|| format!("opening cache directory {}", dir.display()))?
            .with_max_entry_size(store_config.max_entry_size_bytes()),
        None => ObjectStoreBackend::from_config(&store_config)
            .context("opening blob store from environment")?,
    };

    let cache = RawBlobCache::new(Arc::new(backend), BlobCacheConfig::from_env())
        .context("invalid blob cache configuration")?;
    Ok(Arc::new(cache))
}
