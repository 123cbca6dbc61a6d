//! Raw binary payload cache for grid files.
//!
//! Provides:
//! - [`RawBlobCache`], a key/value store that splits payloads too large for
//!   one backend entry into chunks and reassembles them on read
//! - Storage backends: in-process memory and any `object_store`
//!   implementation (MinIO/S3, local filesystem)

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod record;

pub use backend::{BlobBackend, MemoryBackend, ObjectStoreBackend};
pub use cache::{BlobCacheStats, RawBlobCache};
pub use config::{BlobCacheConfig, ObjectStoreBackendConfig, StoreKind};
pub use error::{BlobCacheError, BlobCacheResult};
pub use record::{BlobMetadata, BlobRecord, ChunkManifest};
