//! Error types for the decode pipeline.

use blob_cache::BlobCacheError;
use grib2_parser::Grib2Error;
use netcdf_parser::NetCdfError;
use thiserror::Error;

/// Errors that can occur while resolving, decoding or caching a request.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The referenced identifier is not in the blob cache.
    #[error("source not found: {0}")]
    MissingSource(String),

    /// The byte source cannot be resolved at all.
    #[error("unsupported input: {0}")]
    UnsupportedInput(String),

    /// Header parsing or per-chunk extraction failed.
    #[error("format decode error: {0}")]
    FormatDecode(String),

    /// Request options that can never produce a result.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Result cache storage failure. Never returned from a decode; the
    /// pipeline logs it and treats the lookup as a miss.
    #[error("cache I/O error: {0}")]
    CacheIo(String),
}

impl DecodeError {
    pub fn missing_source(id: impl Into<String>) -> Self {
        Self::MissingSource(id.into())
    }

    pub fn unsupported_input(msg: impl Into<String>) -> Self {
        Self::UnsupportedInput(msg.into())
    }

    pub fn format_decode(msg: impl Into<String>) -> Self {
        Self::FormatDecode(msg.into())
    }

    pub fn invalid_options(msg: impl Into<String>) -> Self {
        Self::InvalidOptions(msg.into())
    }

    pub fn cache_io(msg: impl Into<String>) -> Self {
        Self::CacheIo(msg.into())
    }
}

impl From<NetCdfError> for DecodeError {
    fn from(err: NetCdfError) -> Self {
        Self::FormatDecode(format!("NetCDF: {}", err))
    }
}

impl From<Grib2Error> for DecodeError {
    fn from(err: Grib2Error) -> Self {
        Self::FormatDecode(format!("GRIB2: {}", err))
    }
}

impl From<BlobCacheError> for DecodeError {
    fn from(err: BlobCacheError) -> Self {
        Self::CacheIo(err.to_string())
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        Self::CacheIo(err.to_string())
    }
}

/// Result type for decode pipeline operations.
pub type Result<T> = std::result::Result<T, DecodeError>;
