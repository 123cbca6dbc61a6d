//! Chunked decode pipeline for NetCDF and GRIB2 files with result caching.
//!
//! A request names a byte source and extraction filters. The pipeline
//! fingerprints it, answers from the result cache when it can, and otherwise
//! streams the bytes through fixed-size chunks into a format adapter:
//!
//! ```text
//! DecodeRequest
//!      │
//!      ▼
//! fingerprint::for_request ──► ResultCache::get ──► hit: Provenance::Cache
//!      │
//!      ▼ miss
//! resolve bytes (buffer, or RawBlobCache entry) ──► gunzip if needed
//!      │
//!      ▼
//! FormatDecoder::parse_header (NetCDF only)
//!      │
//!      ▼
//! process_in_chunks ──► FormatDecoder::extract, chunk by chunk
//!      │
//!      ▼
//! FormatDecoder::finish ──► ResultCache::put (best-effort) ──► Provenance::Fresh
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use blob_cache::RawBlobCache;
//! use decode_pipeline::{DecodeOptions, DecodePipeline, DecodeRequest, DecoderConfig};
//! use grid_common::DataFormat;
//!
//! let pipeline = DecodePipeline::new(Arc::new(RawBlobCache::in_memory()), DecoderConfig::default())?;
//! let request = DecodeRequest::buffer(bytes, DecodeOptions::new().with_variables(["TMP"]));
//! let outcome = pipeline.decode(DataFormat::Grib2, request).await?;
//! ```

pub mod config;
pub mod decoder;
pub mod error;
pub mod fingerprint;
pub mod inflight;
pub mod pipeline;
pub mod result_cache;
pub mod streamer;
pub mod types;

pub use config::DecoderConfig;
pub use decoder::{DecodeFilters, FormatAdapter, FormatDecoder, Grib2Adapter, NetCdfAdapter};
pub use error::{DecodeError, Result};
pub use fingerprint::generate_key;
pub use inflight::InFlight;
pub use pipeline::{inflate_if_gzip, DecodePipeline, PipelineStats};
pub use result_cache::{ResultCache, ResultCacheStats};
pub use streamer::{
    process_in_chunks, ChunkHandler, ChunkInfo, ChunkProgress, ChunkWindows, ChunkedOutput,
};
pub use types::{
    ByteSource, DecodeOptions, DecodeOutcome, DecodeRequest, DecodeResult, DecodeStage, Decoded,
    Grib2DecodeResult, Grib2MessageData, MessageInfo, NetCdfDecodeResult, ProgressEvent,
    ProgressSink, Provenance, VariableData, VariableMetadata,
};
