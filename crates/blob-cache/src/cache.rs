//! Size-limited persistent blob cache with transparent chunking.
//!
//! Each logical entry is stored as a JSON record under `meta/{key}` plus
//! either one `data/{key}` payload or numbered `chunks/{key}/{index:06}`
//! pieces described by a [`ChunkManifest`]. Payload records are written
//! before the meta record, so a reader never sees an entry whose data is
//! still being written.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use grid_common::rolling_hash_abs;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::backend::{BlobBackend, MemoryBackend};
use crate::config::BlobCacheConfig;
use crate::error::{BlobCacheError, BlobCacheResult};
use crate::record::{BlobMetadata, BlobRecord, ChunkManifest, Layout, StoredEntry};

const META_PREFIX: &str = "meta";
const DATA_PREFIX: &str = "data";
const CHUNK_PREFIX: &str = "chunks";

fn meta_key(key: &str) -> String {
    format!("{}/{}", META_PREFIX, key)
}

fn data_key(key: &str) -> String {
    format!("{}/{}", DATA_PREFIX, key)
}

fn chunk_dir(key: &str) -> String {
    format!("{}/{}", CHUNK_PREFIX, key)
}

fn chunk_key(key: &str, index: u64) -> String {
    format!("{}/{}/{:06}", CHUNK_PREFIX, key, index)
}

fn validate_key(key: &str) -> BlobCacheResult<()> {
    let valid = !key.is_empty()
        && key != "."
        && key != ".."
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(BlobCacheError::InvalidKey(key.to_string()))
    }
}

fn slug(s: &str) -> String {
    let slug: String = s
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if slug.is_empty() {
        "unknown".to_string()
    } else {
        slug
    }
}

/// Cache statistics.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BlobCacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub chunked_writes: u64,
    pub deletes: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
}

impl BlobCacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Key/value store for raw binary payloads of any size.
pub struct RawBlobCache {
    backend: Arc<dyn BlobBackend>,
    inline_limit: usize,
    chunk_size: usize,
    stats: Mutex<BlobCacheStats>,
}

impl RawBlobCache {
    pub fn new(backend: Arc<dyn BlobBackend>, config: BlobCacheConfig) -> BlobCacheResult<Self> {
        config.validate().map_err(BlobCacheError::Config)?;
        let max_entry = backend.max_entry_size();
        Ok(Self {
            inline_limit: config.inline_limit_bytes().min(max_entry),
            chunk_size: config.chunk_size_bytes().min(max_entry).max(1),
            backend,
            stats: Mutex::new(BlobCacheStats::default()),
        })
    }

    /// A cache over a fresh [`MemoryBackend`] with default settings.
    pub fn in_memory() -> Self {
        let backend = MemoryBackend::default();
        let config = BlobCacheConfig::default();
        Self {
            inline_limit: config.inline_limit_bytes().min(backend.max_entry_size()),
            chunk_size: config.chunk_size_bytes().min(backend.max_entry_size()),
            backend: Arc::new(backend),
            stats: Mutex::new(BlobCacheStats::default()),
        }
    }

    /// Override the chunking thresholds with exact byte counts.
    pub fn with_chunking(mut self, inline_limit: usize, chunk_size: usize) -> BlobCacheResult<Self> {
        let max_entry = self.backend.max_entry_size();
        if chunk_size == 0 || chunk_size > inline_limit || inline_limit > max_entry {
            return Err(BlobCacheError::Config(format!(
                "need 0 < chunk_size ({}) <= inline_limit ({}) <= backend limit ({})",
                chunk_size, inline_limit, max_entry
            )));
        }
        self.inline_limit = inline_limit;
        self.chunk_size = chunk_size;
        Ok(self)
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// Payloads larger than this are stored chunked.
    pub fn inline_threshold(&self) -> usize {
        self.inline_limit
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Deterministic key for an identifier (URL, path, ...) and the
    /// source/dataset it belongs to.
    pub fn generate_cache_key(identifier: &str, metadata: &BlobMetadata) -> String {
        format!(
            "raw-{}-{}-{}",
            slug(&metadata.source),
            slug(&metadata.dataset),
            rolling_hash_abs(identifier)
        )
    }

    async fn read_entry(&self, key: &str) -> BlobCacheResult<Option<StoredEntry>> {
        match self.backend.read(&meta_key(key)).await? {
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| BlobCacheError::corrupt(key, format!("unreadable meta record: {}", e))),
            None => Ok(None),
        }
    }

    async fn write_entry(
        &self,
        key: &str,
        metadata: BlobMetadata,
        layout: Layout,
    ) -> BlobCacheResult<()> {
        let entry = StoredEntry { metadata, layout };
        let raw = serde_json::to_vec(&entry)?;
        self.backend.write(&meta_key(key), Bytes::from(raw)).await
    }

    /// Remove every record belonging to `key`, meta record first.
    async fn purge(&self, key: &str) -> BlobCacheResult<bool> {
        let meta = meta_key(key);
        let existed = self.backend.read(&meta).await?.is_some();
        self.backend.remove(&meta).await?;

        for chunk in self.backend.list(&chunk_dir(key)).await? {
            self.backend.remove(&chunk).await?;
        }
        self.backend.remove(&data_key(key)).await?;

        Ok(existed)
    }

    /// Read an entry, reassembling it if it was stored chunked.
    #[instrument(skip(self), fields(backend = %self.backend.name()))]
    pub async fn get(&self, key: &str) -> BlobCacheResult<Option<BlobRecord>> {
        validate_key(key)?;

        let Some(entry) = self.read_entry(key).await? else {
            self.stats.lock().await.misses += 1;
            debug!("Blob cache miss");
            return Ok(None);
        };

        let data = match &entry.layout {
            Layout::Inline => self
                .backend
                .read(&data_key(key))
                .await?
                .ok_or_else(|| BlobCacheError::corrupt(key, "inline payload is missing"))?,
            Layout::Chunked { manifest } => self.reassemble_chunks(manifest).await?,
        };

        if data.len() as u64 != entry.metadata.size {
            return Err(BlobCacheError::corrupt(
                key,
                format!(
                    "payload is {} bytes, metadata says {}",
                    data.len(),
                    entry.metadata.size
                ),
            ));
        }

        {
            let mut stats = self.stats.lock().await;
            stats.hits += 1;
            stats.bytes_read += data.len() as u64;
        }
        debug!(size = data.len(), "Blob cache hit");

        Ok(Some(BlobRecord {
            key: key.to_string(),
            data,
            metadata: entry.metadata,
        }))
    }

    /// Metadata of an entry without reading its payload.
    pub async fn get_metadata(&self, key: &str) -> BlobCacheResult<Option<BlobMetadata>> {
        validate_key(key)?;
        Ok(self.read_entry(key).await?.map(|entry| entry.metadata))
    }

    pub async fn contains(&self, key: &str) -> BlobCacheResult<bool> {
        validate_key(key)?;
        Ok(self.backend.read(&meta_key(key)).await?.is_some())
    }

    /// Store a payload, replacing any previous entry under `key`.
    ///
    /// Payloads above [`Self::inline_threshold`] are stored chunked.
    #[instrument(skip(self, data, metadata), fields(size = data.len()))]
    pub async fn put(&self, key: &str, data: Bytes, metadata: BlobMetadata) -> BlobCacheResult<()> {
        validate_key(key)?;

        if data.len() > self.inline_threshold() {
            self.put_chunked(key, data, metadata).await?;
            return Ok(());
        }

        self.purge(key).await?;

        let size = data.len();
        self.backend.write(&data_key(key), data).await?;
        let metadata = BlobMetadata {
            size: size as u64,
            ..metadata
        };
        self.write_entry(key, metadata, Layout::Inline).await?;

        let mut stats = self.stats.lock().await;
        stats.writes += 1;
        stats.bytes_written += size as u64;
        Ok(())
    }

    /// Store a payload as a manifest plus chunk records.
    #[instrument(skip(self, data, metadata), fields(size = data.len()))]
    pub async fn put_chunked(
        &self,
        key: &str,
        data: Bytes,
        metadata: BlobMetadata,
    ) -> BlobCacheResult<ChunkManifest> {
        validate_key(key)?;
        self.purge(key).await?;

        let chunk_size = self.chunk_size();
        let mut chunk_keys = Vec::new();
        for (index, start) in (0..data.len()).step_by(chunk_size).enumerate() {
            let end = (start + chunk_size).min(data.len());
            let ck = chunk_key(key, index as u64);
            self.backend.write(&ck, data.slice(start..end)).await?;
            chunk_keys.push(ck);
        }

        let manifest = self
            .finish_chunked(key, metadata, chunk_size, data.len() as u64, chunk_keys)
            .await?;
        info!(
            total_chunks = manifest.total_chunks,
            chunk_size = chunk_size,
            "Stored chunked blob"
        );
        Ok(manifest)
    }

    /// Ingest a byte stream into chunk records without buffering the whole
    /// payload. Network fetching is the caller's concern.
    ///
    /// If the stream fails, records written so far are removed.
    #[instrument(skip(self, stream, metadata))]
    pub async fn download_chunked<S, E>(
        &self,
        key: &str,
        mut stream: S,
        metadata: BlobMetadata,
    ) -> BlobCacheResult<ChunkManifest>
    where
        S: Stream<Item = Result<Bytes, E>> + Unpin + Send,
        E: std::fmt::Display,
    {
        validate_key(key)?;
        self.purge(key).await?;

        let chunk_size = self.chunk_size();
        let mut pending = BytesMut::with_capacity(chunk_size);
        let mut chunk_keys = Vec::new();
        let mut total: u64 = 0;

        while let Some(item) = stream.next().await {
            let bytes = match item {
                Ok(bytes) => bytes,
                Err(e) => {
                    if let Err(cleanup) = self.purge(key).await {
                        warn!(error = %cleanup, "Failed to clean up partial download");
                    }
                    return Err(BlobCacheError::Stream(e.to_string()));
                }
            };

            total += bytes.len() as u64;
            pending.extend_from_slice(&bytes);

            while pending.len() >= chunk_size {
                let chunk = pending.split_to(chunk_size).freeze();
                let ck = chunk_key(key, chunk_keys.len() as u64);
                self.backend.write(&ck, chunk).await?;
                chunk_keys.push(ck);
            }
        }

        if !pending.is_empty() {
            let ck = chunk_key(key, chunk_keys.len() as u64);
            self.backend.write(&ck, pending.freeze()).await?;
            chunk_keys.push(ck);
        }

        let manifest = self
            .finish_chunked(key, metadata, chunk_size, total, chunk_keys)
            .await?;
        info!(
            total_size = total,
            total_chunks = manifest.total_chunks,
            "Ingested stream into chunked blob"
        );
        Ok(manifest)
    }

    async fn finish_chunked(
        &self,
        key: &str,
        metadata: BlobMetadata,
        chunk_size: usize,
        total_size: u64,
        chunk_keys: Vec<String>,
    ) -> BlobCacheResult<ChunkManifest> {
        let manifest = ChunkManifest {
            file_key: key.to_string(),
            chunk_size: chunk_size as u64,
            total_chunks: chunk_keys.len() as u64,
            total_size,
            chunk_keys,
        };
        manifest.validate()?;

        let metadata = BlobMetadata {
            size: total_size,
            ..metadata
        };
        self.write_entry(
            key,
            metadata,
            Layout::Chunked {
                manifest: manifest.clone(),
            },
        )
        .await?;

        let mut stats = self.stats.lock().await;
        stats.writes += 1;
        stats.chunked_writes += 1;
        stats.bytes_written += total_size;
        Ok(manifest)
    }

    /// Concatenate a manifest's chunks in order.
    ///
    /// A missing chunk fails the whole read with [`BlobCacheError::MissingChunk`].
    pub async fn reassemble_chunks(&self, manifest: &ChunkManifest) -> BlobCacheResult<Bytes> {
        manifest.validate()?;

        let mut buffer = BytesMut::with_capacity(manifest.total_size as usize);
        for (index, ck) in manifest.chunk_keys.iter().enumerate() {
            let index = index as u64;
            let chunk = self
                .backend
                .read(ck)
                .await?
                .ok_or_else(|| BlobCacheError::MissingChunk {
                    key: manifest.file_key.clone(),
                    index,
                })?;

            let (start, end) = manifest.chunk_range(index);
            if chunk.len() as u64 != end - start {
                return Err(BlobCacheError::corrupt(
                    &manifest.file_key,
                    format!(
                        "chunk {} is {} bytes, expected {}",
                        index,
                        chunk.len(),
                        end - start
                    ),
                ));
            }
            buffer.extend_from_slice(&chunk);
        }

        Ok(buffer.freeze())
    }

    /// Delete an entry and all its records. Returns whether it existed.
    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) -> BlobCacheResult<bool> {
        validate_key(key)?;
        let existed = self.purge(key).await?;
        if existed {
            self.stats.lock().await.deletes += 1;
        }
        Ok(existed)
    }

    /// Remove every entry.
    pub async fn clear(&self) -> BlobCacheResult<()> {
        self.backend.clear().await?;
        info!(backend = %self.backend.name(), "Cleared blob cache");
        Ok(())
    }

    /// Keys of all stored entries, sorted.
    pub async fn keys(&self) -> BlobCacheResult<Vec<String>> {
        let prefix = format!("{}/", META_PREFIX);
        let mut keys: Vec<String> = self
            .backend
            .list(META_PREFIX)
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect();
        keys.sort();
        Ok(keys)
    }

    pub async fn stats(&self) -> BlobCacheStats {
        self.stats.lock().await.clone()
    }
}
