use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::TryStreamExt;
use object_store::{
    aws::AmazonS3Builder, local::LocalFileSystem, memory::InMemory, path::Path, ObjectStore,
};
use tracing::{debug, instrument};

use super::BlobBackend;
use crate::config::{ObjectStoreBackendConfig, StoreKind};
use crate::error::{BlobCacheError, BlobCacheResult};

/// Backend over any `object_store` implementation (S3/MinIO, local disk, memory).
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    label: String,
    prefix: String,
    max_entry_size: usize,
}

impl ObjectStoreBackend {
    pub fn new(store: Arc<dyn ObjectStore>, label: impl Into<String>) -> Self {
        Self {
            store,
            label: label.into(),
            prefix: String::new(),
            max_entry_size: ObjectStoreBackendConfig::default().max_entry_size_bytes(),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemory::new()), "memory")
    }

    /// Store objects as files below `root`, creating it if needed.
    pub fn local(root: impl AsRef<std::path::Path>) -> BlobCacheResult<Self> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|e| {
            BlobCacheError::backend(format!("Failed to create {}: {}", root.display(), e))
        })?;
        let store = LocalFileSystem::new_with_prefix(root).map_err(|e| {
            BlobCacheError::backend(format!("Failed to open {}: {}", root.display(), e))
        })?;
        Ok(Self::new(Arc::new(store), "local"))
    }

    /// S3/MinIO bucket from config.
    pub fn s3(config: &ObjectStoreBackendConfig) -> BlobCacheResult<Self> {
        let store = AmazonS3Builder::new()
            .with_endpoint(&config.endpoint)
            .with_bucket_name(&config.bucket)
            .with_access_key_id(&config.access_key_id)
            .with_secret_access_key(&config.secret_access_key)
            .with_region(&config.region)
            .with_allow_http(config.allow_http)
            .build()
            .map_err(|e| BlobCacheError::backend(format!("Failed to create S3 client: {}", e)))?;
        Ok(Self::new(Arc::new(store), format!("s3:{}", config.bucket)))
    }

    /// Build the backend selected by `config.kind`.
    pub fn from_config(config: &ObjectStoreBackendConfig) -> BlobCacheResult<Self> {
        config.validate().map_err(BlobCacheError::Config)?;

        let backend = match config.kind {
            StoreKind::Memory => Self::in_memory(),
            StoreKind::Local => Self::local(&config.local_root)?,
            StoreKind::S3 => Self::s3(config)?,
        };
        Ok(backend
            .with_prefix(&config.prefix)
            .with_max_entry_size(config.max_entry_size_bytes()))
    }

    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.trim_matches('/').to_string();
        self
    }

    pub fn with_max_entry_size(mut self, max_entry_size: usize) -> Self {
        self.max_entry_size = max_entry_size;
        self
    }

    fn location(&self, key: &str) -> Path {
        if self.prefix.is_empty() {
            Path::from(key)
        } else {
            Path::from(format!("{}/{}", self.prefix, key))
        }
    }

    fn strip_prefix<'a>(&self, location: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            return location;
        }
        location
            .strip_prefix(self.prefix.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(location)
    }
}

#[async_trait]
impl BlobBackend for ObjectStoreBackend {
    fn name(&self) -> &str {
        &self.label
    }

    fn max_entry_size(&self) -> usize {
        self.max_entry_size
    }

    #[instrument(skip(self), fields(store = %self.label))]
    async fn read(&self, key: &str) -> BlobCacheResult<Option<Bytes>> {
        let location = self.location(key);

        let result = match self.store.get(&location).await {
            Ok(result) => result,
            Err(object_store::Error::NotFound { .. }) => return Ok(None),
            Err(e) => {
                return Err(BlobCacheError::backend(format!(
                    "Failed to read {}: {}",
                    key, e
                )))
            }
        };

        let bytes = result
            .bytes()
            .await
            .map_err(|e| BlobCacheError::backend(format!("Failed to read bytes: {}", e)))?;

        debug!(size = bytes.len(), "Read object");
        Ok(Some(bytes))
    }

    #[instrument(skip(self, data), fields(store = %self.label, size = data.len()))]
    async fn write(&self, key: &str, data: Bytes) -> BlobCacheResult<()> {
        if data.len() > self.max_entry_size {
            return Err(BlobCacheError::EntryTooLarge {
                size: data.len(),
                limit: self.max_entry_size,
            });
        }

        self.store
            .put(&self.location(key), data.into())
            .await
            .map_err(|e| BlobCacheError::backend(format!("Failed to write {}: {}", key, e)))?;

        Ok(())
    }

    #[instrument(skip(self), fields(store = %self.label))]
    async fn remove(&self, key: &str) -> BlobCacheResult<()> {
        match self.store.delete(&self.location(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(BlobCacheError::backend(format!(
                "Failed to delete {}: {}",
                key, e
            ))),
        }
    }

    async fn list(&self, prefix: &str) -> BlobCacheResult<Vec<String>> {
        let full_prefix = match (self.prefix.is_empty(), prefix.is_empty()) {
            (true, _) => prefix.to_string(),
            (false, true) => self.prefix.clone(),
            (false, false) => format!("{}/{}", self.prefix, prefix),
        };
        let prefix_path = (!full_prefix.is_empty()).then(|| Path::from(full_prefix));

        let mut keys = Vec::new();
        let mut stream = self.store.list(prefix_path.as_ref());
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| BlobCacheError::backend(format!("List failed: {}", e)))?
        {
            let location = meta.location.to_string();
            keys.push(self.strip_prefix(&location).to_string());
        }

        Ok(keys)
    }

    async fn clear(&self) -> BlobCacheResult<()> {
        for key in self.list("").await? {
            self.remove(&key).await?;
        }
        Ok(())
    }
}
