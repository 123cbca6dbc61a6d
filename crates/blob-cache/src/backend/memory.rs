use std::collections::HashMap;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{under_prefix, BlobBackend};
use crate::error::{BlobCacheError, BlobCacheResult};

/// Process-local backend, mostly for tests and short-lived tools.
#[derive(Debug)]
pub struct MemoryBackend {
    entries: RwLock<HashMap<String, Bytes>>,
    max_entry_size: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(64 * 1024 * 1024)
    }
}

impl MemoryBackend {
    pub fn new(max_entry_size: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_entry_size,
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn max_entry_size(&self) -> usize {
        self.max_entry_size
    }

    async fn read(&self, key: &str) -> BlobCacheResult<Option<Bytes>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn write(&self, key: &str, data: Bytes) -> BlobCacheResult<()> {
        if data.len() > self.max_entry_size {
            return Err(BlobCacheError::EntryTooLarge {
                size: data.len(),
                limit: self.max_entry_size,
            });
        }
        self.entries.write().await.insert(key.to_string(), data);
        Ok(())
    }

    async fn remove(&self, key: &str) -> BlobCacheResult<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> BlobCacheResult<Vec<String>> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| under_prefix(k, prefix))
            .cloned()
            .collect())
    }

    async fn clear(&self) -> BlobCacheResult<()> {
        self.entries.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_entry_limit() {
        let backend = MemoryBackend::new(4);
        backend.write("a", Bytes::from_static(b"1234")).await.unwrap();
        let err = backend.write("b", Bytes::from_static(b"12345")).await;
        assert!(matches!(err, Err(BlobCacheError::EntryTooLarge { size: 5, limit: 4 })));
    }

    #[tokio::test]
    async fn test_list_matches_segments() {
        let backend = MemoryBackend::default();
        for key in ["chunks/a/000000", "chunks/ab/000000", "meta/a"] {
            backend.write(key, Bytes::new()).await.unwrap();
        }
        let listed = backend.list("chunks/a").await.unwrap();
        assert_eq!(listed, vec!["chunks/a/000000".to_string()]);
    }
}
