//! Configuration for the blob cache and its object store backend.

use serde::{Deserialize, Serialize};

const MB: usize = 1024 * 1024;

/// Chunking thresholds for [`crate::RawBlobCache`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlobCacheConfig {
    /// Payloads above this size are stored chunked, in megabytes.
    pub inline_limit_mb: usize,

    /// Size of each stored chunk, in megabytes.
    pub chunk_size_mb: usize,
}

impl Default for BlobCacheConfig {
    fn default() -> Self {
        Self {
            inline_limit_mb: 32,
            chunk_size_mb: 16,
        }
    }
}

impl BlobCacheConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("BLOB_CACHE_INLINE_LIMIT_MB") {
            if let Ok(size) = val.parse() {
                config.inline_limit_mb = size;
            }
        }

        if let Ok(val) = std::env::var("BLOB_CACHE_CHUNK_SIZE_MB") {
            if let Ok(size) = val.parse() {
                config.chunk_size_mb = size;
            }
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.chunk_size_mb == 0 {
            return Err("chunk_size_mb must be > 0".to_string());
        }

        if self.chunk_size_mb > self.inline_limit_mb {
            return Err("chunk_size_mb must not exceed inline_limit_mb".to_string());
        }

        Ok(())
    }

    pub fn inline_limit_bytes(&self) -> usize {
        self.inline_limit_mb * MB
    }

    pub fn chunk_size_bytes(&self) -> usize {
        self.chunk_size_mb * MB
    }
}

/// Which object store implementation backs the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Local,
    S3,
}

impl StoreKind {
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "local" | "file" => Some(Self::Local),
            "s3" | "minio" => Some(Self::S3),
            _ => None,
        }
    }
}

/// Connection settings for [`crate::ObjectStoreBackend`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreBackendConfig {
    pub kind: StoreKind,
    /// Root directory for the local filesystem store.
    pub local_root: String,
    /// S3/MinIO endpoint URL
    pub endpoint: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// AWS region (use "us-east-1" for MinIO)
    pub region: String,
    /// Allow HTTP (for local MinIO)
    pub allow_http: bool,
    /// Key prefix inside the store.
    pub prefix: String,
    /// Largest single object the store accepts, in megabytes.
    pub max_entry_size_mb: usize,
}

impl Default for ObjectStoreBackendConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::Memory,
            local_root: "./blob-cache".to_string(),
            endpoint: "http://minio:9000".to_string(),
            bucket: "weather-data".to_string(),
            access_key_id: "minioadmin".to_string(),
            secret_access_key: "minioadmin".to_string(),
            region: "us-east-1".to_string(),
            allow_http: true,
            prefix: "blob-cache".to_string(),
            max_entry_size_mb: 64,
        }
    }
}

impl ObjectStoreBackendConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            kind: std::env::var("BLOB_STORE")
                .ok()
                .and_then(|v| StoreKind::from_name(&v))
                .unwrap_or(defaults.kind),
            local_root: std::env::var("BLOB_STORE_ROOT").unwrap_or(defaults.local_root),
            endpoint: std::env::var("S3_ENDPOINT").unwrap_or(defaults.endpoint),
            bucket: std::env::var("S3_BUCKET").unwrap_or(defaults.bucket),
            access_key_id: std::env::var("S3_ACCESS_KEY").unwrap_or(defaults.access_key_id),
            secret_access_key: std::env::var("S3_SECRET_KEY")
                .unwrap_or(defaults.secret_access_key),
            region: std::env::var("S3_REGION").unwrap_or(defaults.region),
            allow_http: std::env::var("S3_ALLOW_HTTP")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(defaults.allow_http),
            prefix: std::env::var("BLOB_STORE_PREFIX").unwrap_or(defaults.prefix),
            max_entry_size_mb: std::env::var("BLOB_STORE_MAX_ENTRY_MB")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_entry_size_mb),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entry_size_mb == 0 {
            return Err("max_entry_size_mb must be > 0".to_string());
        }

        match self.kind {
            StoreKind::Local if self.local_root.is_empty() => {
                Err("local_root must be set for the local store".to_string())
            }
            StoreKind::S3 if self.bucket.is_empty() || self.endpoint.is_empty() => {
                Err("endpoint and bucket must be set for the s3 store".to_string())
            }
            _ => Ok(()),
        }
    }

    pub fn max_entry_size_bytes(&self) -> usize {
        self.max_entry_size_mb * MB
    }
}
