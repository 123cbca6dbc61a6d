//! Cache of decode results keyed by fingerprint.
//!
//! Built on [`RawBlobCache`]: results are stored as JSON payloads. Reads fail
//! open and writes are best-effort, so a broken store never fails a decode.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use blob_cache::{BlobMetadata, RawBlobCache};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::error::{DecodeError, Result};
use crate::types::DecodeResult;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ResultCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub failed_writes: u64,
    /// Reads that failed or returned an undecodable payload.
    pub read_errors: u64,
}

impl ResultCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

pub struct ResultCache {
    blobs: Arc<RawBlobCache>,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    failed_writes: AtomicU64,
    read_errors: AtomicU64,
}

impl ResultCache {
    pub fn new(blobs: Arc<RawBlobCache>) -> Self {
        Self {
            blobs,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            failed_writes: AtomicU64::new(0),
            read_errors: AtomicU64::new(0),
        }
    }

    async fn try_get(&self, fingerprint: &str) -> Result<Option<DecodeResult>> {
        let Some(record) = self.blobs.get(fingerprint).await? else {
            return Ok(None);
        };
        let result = serde_json::from_slice(&record.data)
            .map_err(|e| DecodeError::cache_io(format!("undecodable cached result: {}", e)))?;
        Ok(Some(result))
    }

    async fn try_put(
        &self,
        fingerprint: &str,
        result: &DecodeResult,
        metadata: BlobMetadata,
    ) -> Result<()> {
        let payload = serde_json::to_vec(result)?;
        self.blobs
            .put(fingerprint, Bytes::from(payload), metadata)
            .await?;
        Ok(())
    }

    /// Look up a result. Storage and decoding failures count as a miss.
    #[instrument(skip(self))]
    pub async fn get(&self, fingerprint: &str) -> Option<DecodeResult> {
        match self.try_get(fingerprint).await {
            Ok(Some(result)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Result cache hit");
                Some(result)
            }
            Ok(None) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("Result cache miss");
                None
            }
            Err(e) => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.read_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Result cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store a result. Failures are logged and reported as `false`.
    #[instrument(skip(self, result, metadata))]
    pub async fn put(&self, fingerprint: &str, result: &DecodeResult, metadata: BlobMetadata) -> bool {
        match self.try_put(fingerprint, result, metadata).await {
            Ok(()) => {
                self.writes.fetch_add(1, Ordering::Relaxed);
                debug!("Stored decode result");
                true
            }
            Err(e) => {
                self.failed_writes.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Failed to store decode result");
                false
            }
        }
    }

    /// Drop a cached result. Returns whether one was removed.
    pub async fn invalidate(&self, fingerprint: &str) -> bool {
        match self.blobs.delete(fingerprint).await {
            Ok(existed) => existed,
            Err(e) => {
                warn!(fingerprint = %fingerprint, error = %e, "Failed to invalidate decode result");
                false
            }
        }
    }

    pub fn stats(&self) -> ResultCacheStats {
        ResultCacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            failed_writes: self.failed_writes.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Grib2DecodeResult, Grib2ResultMetadata};

    fn empty_result() -> DecodeResult {
        DecodeResult::Grib2(Grib2DecodeResult {
            messages: Vec::new(),
            metadata: Grib2ResultMetadata {
                total_size: 0,
                processed_chunks: 0,
                message_count: 0,
                bbox: None,
                time_range: None,
                variables: Vec::new(),
            },
        })
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = ResultCache::new(Arc::new(RawBlobCache::in_memory()));
        let result = empty_result();

        assert!(cache.get("processed-grib2-1").await.is_none());
        assert!(cache.put("processed-grib2-1", &result, BlobMetadata::new("t", "t")).await);
        assert_eq!(cache.get("processed-grib2-1").await, Some(result));

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_a_miss() {
        let blobs = Arc::new(RawBlobCache::in_memory());
        blobs
            .put(
                "processed-grib2-2",
                Bytes::from_static(b"not json"),
                BlobMetadata::new("t", "t"),
            )
            .await
            .unwrap();

        let cache = ResultCache::new(blobs);
        assert!(cache.get("processed-grib2-2").await.is_none());
        assert_eq!(cache.stats().read_errors, 1);
    }

    #[tokio::test]
    async fn test_invalidate() {
        let cache = ResultCache::new(Arc::new(RawBlobCache::in_memory()));
        cache
            .put("processed-grib2-3", &empty_result(), BlobMetadata::new("t", "t"))
            .await;

        assert!(cache.invalidate("processed-grib2-3").await);
        assert!(!cache.invalidate("processed-grib2-3").await);
        assert!(cache.get("processed-grib2-3").await.is_none());
    }
}
