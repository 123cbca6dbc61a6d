//! Format adapters turning chunk windows into structured results.
//!
//! Both adapters implement [`FormatAdapter`]; [`FormatDecoder`] is the closed
//! set of them and is matched explicitly.

mod grib2;
mod netcdf;

use bytes::Bytes;
use grid_common::{BoundingBox, DataFormat, TimeRange};

use crate::config::DecoderConfig;
use crate::error::Result;
use crate::streamer::ChunkInfo;
use crate::types::{DecodeOptions, DecodeResult};

pub use self::grib2::Grib2Adapter;
pub use self::netcdf::NetCdfAdapter;

/// Request filters as seen by the adapters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeFilters {
    /// Requested names in request order, duplicates removed.
    pub variables: Vec<String>,
    pub bbox: Option<BoundingBox>,
    pub time_range: Option<TimeRange>,
}

impl DecodeFilters {
    pub fn from_options(options: &DecodeOptions) -> Self {
        let mut variables: Vec<String> = Vec::with_capacity(options.variables.len());
        for name in &options.variables {
            if !variables.contains(name) {
                variables.push(name.clone());
            }
        }
        Self {
            variables,
            bbox: options.bbox,
            time_range: options.time_range,
        }
    }
}

/// Totals of the streaming run, passed to [`FormatAdapter::finish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub total_size: u64,
    pub processed_chunks: u64,
}

pub trait FormatAdapter {
    /// Whether [`FormatAdapter::parse_header`] reads anything.
    fn has_header(&self) -> bool;

    /// Read metadata needed before chunk iteration from the full buffer.
    fn parse_header(&mut self, buffer: &Bytes) -> Result<()>;

    /// Cheap check whether `variable` can have data inside the chunk.
    fn can_parse_chunk(&self, info: &ChunkInfo, variable: &str) -> bool;

    /// Extract from one window. Returns the number of values or messages
    /// produced.
    fn extract(&mut self, chunk: &Bytes, info: &ChunkInfo) -> Result<usize>;

    /// Assemble the result once every chunk was visited.
    fn finish(self, summary: RunSummary) -> Result<DecodeResult>;
}

/// One adapter per supported format.
#[derive(Debug)]
pub enum FormatDecoder {
    NetCdf(NetCdfAdapter),
    Grib2(Grib2Adapter),
}

impl FormatDecoder {
    pub fn new(format: DataFormat, filters: DecodeFilters, config: &DecoderConfig) -> Self {
        match format {
            DataFormat::NetCdf => {
                FormatDecoder::NetCdf(NetCdfAdapter::new(filters, config.header_window_bytes))
            }
            DataFormat::Grib2 => FormatDecoder::Grib2(Grib2Adapter::new(filters)),
        }
    }

    pub fn format(&self) -> DataFormat {
        match self {
            FormatDecoder::NetCdf(_) => DataFormat::NetCdf,
            FormatDecoder::Grib2(_) => DataFormat::Grib2,
        }
    }

    pub fn has_header(&self) -> bool {
        match self {
            FormatDecoder::NetCdf(a) => a.has_header(),
            FormatDecoder::Grib2(a) => a.has_header(),
        }
    }

    pub fn parse_header(&mut self, buffer: &Bytes) -> Result<()> {
        match self {
            FormatDecoder::NetCdf(a) => a.parse_header(buffer),
            FormatDecoder::Grib2(a) => a.parse_header(buffer),
        }
    }

    pub fn can_parse_chunk(&self, info: &ChunkInfo, variable: &str) -> bool {
        match self {
            FormatDecoder::NetCdf(a) => a.can_parse_chunk(info, variable),
            FormatDecoder::Grib2(a) => a.can_parse_chunk(info, variable),
        }
    }

    pub fn extract(&mut self, chunk: &Bytes, info: &ChunkInfo) -> Result<usize> {
        match self {
            FormatDecoder::NetCdf(a) => a.extract(chunk, info),
            FormatDecoder::Grib2(a) => a.extract(chunk, info),
        }
    }

    pub fn finish(self, summary: RunSummary) -> Result<DecodeResult> {
        match self {
            FormatDecoder::NetCdf(a) => a.finish(summary),
            FormatDecoder::Grib2(a) => a.finish(summary),
        }
    }
}
