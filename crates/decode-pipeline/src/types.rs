//! Request, progress and result types.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use grid_common::{BoundingBox, DataFormat, TimeRange};
use serde::{Deserialize, Serialize};

use crate::streamer::ChunkInfo;

/// Where the bytes of a request come from.
#[derive(Debug, Clone)]
pub enum ByteSource {
    /// Bytes supplied directly by the caller.
    Buffer(Bytes),
    /// Key of an entry already stored in the blob cache.
    Reference(String),
}

/// Stage of a decode call.
///
/// `Init -> Header (NetCDF only) -> Processing -> Complete`, with
/// `Failed` reachable from any non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeStage {
    Init,
    Header,
    Processing,
    Complete,
    Failed,
}

impl DecodeStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DecodeStage::Complete | DecodeStage::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_advance_to(&self, next: DecodeStage) -> bool {
        use DecodeStage::*;
        match (self, next) {
            (_, Failed) => !self.is_terminal(),
            (Init, Header) | (Init, Processing) | (Init, Complete) => true,
            (Header, Processing) => true,
            (Processing, Processing) | (Processing, Complete) => true,
            _ => false,
        }
    }
}

impl fmt::Display for DecodeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecodeStage::Init => "init",
            DecodeStage::Header => "header",
            DecodeStage::Processing => "processing",
            DecodeStage::Complete => "complete",
            DecodeStage::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Progress notification delivered to [`DecodeOptions::on_progress`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: DecodeStage,
    /// Percentage in `[0, 100]`.
    pub progress: f64,
}

impl ProgressEvent {
    pub fn new(stage: DecodeStage, progress: f64) -> Self {
        Self { stage, progress }
    }
}

pub type ProgressSink = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Filters and knobs of a decode request.
#[derive(Clone)]
pub struct DecodeOptions {
    /// NetCDF variable names or GRIB2 parameter short names. Empty selects all.
    pub variables: Vec<String>,
    pub bbox: Option<BoundingBox>,
    pub time_range: Option<TimeRange>,
    /// Chunk size in bytes; the pipeline default when unset.
    pub chunk_size: Option<usize>,
    pub on_progress: Option<ProgressSink>,
    /// `false` returns the raw bytes without decoding.
    pub process: bool,
    pub source: String,
    pub dataset: String,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self {
            variables: Vec::new(),
            bbox: None,
            time_range: None,
            chunk_size: None,
            on_progress: None,
            process: true,
            source: String::new(),
            dataset: String::new(),
        }
    }
}

impl fmt::Debug for DecodeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecodeOptions")
            .field("variables", &self.variables)
            .field("bbox", &self.bbox)
            .field("time_range", &self.time_range)
            .field("chunk_size", &self.chunk_size)
            .field("on_progress", &self.on_progress.is_some())
            .field("process", &self.process)
            .field("source", &self.source)
            .field("dataset", &self.dataset)
            .finish()
    }
}

impl DecodeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variables<I, S>(mut self, variables: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.variables = variables.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_bbox(mut self, bbox: BoundingBox) -> Self {
        self.bbox = Some(bbox);
        self
    }

    pub fn with_time_range(mut self, time_range: TimeRange) -> Self {
        self.time_range = Some(time_range);
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = Some(chunk_size);
        self
    }

    pub fn with_progress<F>(mut self, sink: F) -> Self
    where
        F: Fn(ProgressEvent) + Send + Sync + 'static,
    {
        self.on_progress = Some(Arc::new(sink));
        self
    }

    pub fn with_origin(mut self, source: impl Into<String>, dataset: impl Into<String>) -> Self {
        self.source = source.into();
        self.dataset = dataset.into();
        self
    }

    /// Skip decoding and return the resolved bytes.
    pub fn raw(mut self) -> Self {
        self.process = false;
        self
    }
}

/// A byte source plus the options to decode it with.
#[derive(Debug, Clone)]
pub struct DecodeRequest {
    pub source: ByteSource,
    pub options: DecodeOptions,
}

impl DecodeRequest {
    pub fn buffer(bytes: impl Into<Bytes>, options: DecodeOptions) -> Self {
        Self {
            source: ByteSource::Buffer(bytes.into()),
            options,
        }
    }

    pub fn reference(key: impl Into<String>, options: DecodeOptions) -> Self {
        Self {
            source: ByteSource::Reference(key.into()),
            options,
        }
    }
}

/// Structured output of a decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum DecodeResult {
    NetCdf(NetCdfDecodeResult),
    Grib2(Grib2DecodeResult),
}

impl DecodeResult {
    pub fn format(&self) -> DataFormat {
        match self {
            DecodeResult::NetCdf(_) => DataFormat::NetCdf,
            DecodeResult::Grib2(_) => DataFormat::Grib2,
        }
    }

    pub fn as_netcdf(&self) -> Option<&NetCdfDecodeResult> {
        match self {
            DecodeResult::NetCdf(r) => Some(r),
            DecodeResult::Grib2(_) => None,
        }
    }

    pub fn as_grib2(&self) -> Option<&Grib2DecodeResult> {
        match self {
            DecodeResult::Grib2(r) => Some(r),
            DecodeResult::NetCdf(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetCdfDecodeResult {
    pub variables: BTreeMap<String, VariableData>,
    pub metadata: NetCdfResultMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableData {
    pub metadata: VariableMetadata,
    /// Values in file order; fill values are `None`.
    pub data: Vec<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableMetadata {
    /// Length of each dimension, record dimension resolved to the record count.
    pub dimensions: Vec<u64>,
    pub dimension_names: Vec<String>,
    #[serde(rename = "type")]
    pub data_type: String,
    pub attributes: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetCdfResultMetadata {
    pub total_size: u64,
    pub processed_chunks: u64,
    pub bbox: Option<BoundingBox>,
    pub time_range: Option<TimeRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grib2DecodeResult {
    pub messages: Vec<Grib2MessageData>,
    pub metadata: Grib2ResultMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grib2MessageData {
    pub message: MessageInfo,
    /// One value per grid point; masked points are `None`.
    pub data: Vec<Option<f32>>,
    /// The chunk in which the message was completed.
    pub chunk_info: ChunkInfo,
}

/// Identification of a GRIB2 message, taken from sections 0, 1, 3 and 4.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageInfo {
    pub offset: u64,
    pub length: u64,
    pub discipline: u8,
    pub parameter: String,
    pub parameter_category: u8,
    pub parameter_number: u8,
    pub level: String,
    pub level_type: u8,
    pub level_value: u32,
    pub reference_time: DateTime<Utc>,
    /// `None` when the forecast time is missing or out of range.
    pub valid_time: Option<DateTime<Utc>>,
    pub forecast_hour: Option<u32>,
    pub ni: u32,
    pub nj: u32,
    pub bbox: Option<BoundingBox>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grib2ResultMetadata {
    pub total_size: u64,
    pub processed_chunks: u64,
    pub message_count: u64,
    pub bbox: Option<BoundingBox>,
    pub time_range: Option<TimeRange>,
    pub variables: Vec<String>,
}

/// Whether a decoded result came from the result cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Cache,
    Fresh,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub result: DecodeResult,
    pub provenance: Provenance,
    pub fingerprint: String,
}

/// Outcome of [`crate::DecodePipeline::decode`].
#[derive(Debug, Clone)]
pub enum DecodeOutcome {
    /// Undecoded bytes, for requests with `process == false`.
    Raw(Bytes),
    Decoded(Decoded),
}

impl DecodeOutcome {
    pub fn into_decoded(self) -> Option<Decoded> {
        match self {
            DecodeOutcome::Decoded(d) => Some(d),
            DecodeOutcome::Raw(_) => None,
        }
    }

    pub fn into_raw(self) -> Option<Bytes> {
        match self {
            DecodeOutcome::Raw(b) => Some(b),
            DecodeOutcome::Decoded(_) => None,
        }
    }

    pub fn provenance(&self) -> Option<Provenance> {
        match self {
            DecodeOutcome::Decoded(d) => Some(d.provenance),
            DecodeOutcome::Raw(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_transitions() {
        use DecodeStage::*;
        assert!(Init.can_advance_to(Header));
        assert!(Header.can_advance_to(Processing));
        assert!(Processing.can_advance_to(Processing));
        assert!(Processing.can_advance_to(Complete));
        assert!(Processing.can_advance_to(Failed));

        assert!(!Complete.can_advance_to(Failed));
        assert!(!Failed.can_advance_to(Processing));
        assert!(!Processing.can_advance_to(Header));
    }

    #[test]
    fn test_options_default_processes() {
        let options = DecodeOptions::new();
        assert!(options.process);
        assert!(!options.raw().process);
    }

    #[test]
    fn test_result_json_is_tagged() {
        let result = DecodeResult::Grib2(Grib2DecodeResult {
            messages: Vec::new(),
            metadata: Grib2ResultMetadata {
                total_size: 10,
                processed_chunks: 1,
                message_count: 0,
                bbox: None,
                time_range: None,
                variables: vec!["TMP".to_string()],
            },
        });

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["format"], "grib2");
        assert_eq!(json["metadata"]["message_count"], 0);

        let back: DecodeResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, result);
    }
}
