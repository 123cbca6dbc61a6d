//! Request orchestration: fingerprint, result cache, chunked decode.

use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use blob_cache::{BlobCacheError, BlobMetadata, RawBlobCache};
use bytes::Bytes;
use grid_common::DataFormat;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::DecoderConfig;
use crate::decoder::{DecodeFilters, FormatDecoder, RunSummary};
use crate::error::{DecodeError, Result};
use crate::fingerprint;
use crate::inflight::InFlight;
use crate::result_cache::{ResultCache, ResultCacheStats};
use crate::streamer::{process_in_chunks, ChunkHandler, ChunkInfo, ChunkProgress};
use crate::types::{
    ByteSource, DecodeOptions, DecodeOutcome, DecodeRequest, DecodeResult, DecodeStage, Decoded,
    ProgressEvent, ProgressSink, Provenance,
};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Counters reported by [`DecodePipeline::shutdown`].
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct PipelineStats {
    pub requests: u64,
    pub raw_requests: u64,
    pub decodes: u64,
    pub failures: u64,
    pub result_cache: ResultCacheStats,
}

/// Decodes NetCDF and GRIB2 requests, answering repeats from the result cache.
pub struct DecodePipeline {
    blobs: Arc<RawBlobCache>,
    results: ResultCache,
    config: DecoderConfig,
    in_flight: Option<InFlight>,
    requests: AtomicU64,
    raw_requests: AtomicU64,
    decodes: AtomicU64,
    failures: AtomicU64,
}

impl DecodePipeline {
    pub fn new(blobs: Arc<RawBlobCache>, config: DecoderConfig) -> Result<Self> {
        config.validate().map_err(DecodeError::InvalidOptions)?;

        info!(
            backend = %blobs.backend_name(),
            default_chunk_size_mb = config.default_chunk_size_mb,
            dedupe_in_flight = config.dedupe_in_flight,
            "Decode pipeline ready"
        );

        Ok(Self {
            results: ResultCache::new(blobs.clone()),
            in_flight: config.dedupe_in_flight.then(InFlight::new),
            blobs,
            config,
            requests: AtomicU64::new(0),
            raw_requests: AtomicU64::new(0),
            decodes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        })
    }

    pub fn blob_cache(&self) -> &Arc<RawBlobCache> {
        &self.blobs
    }

    pub fn result_cache(&self) -> &ResultCache {
        &self.results
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode a request, or return its raw bytes when `process` is false.
    ///
    /// The whole input is held in memory for the duration of the call;
    /// chunks are slices of it, so peak memory grows with the file size.
    #[instrument(skip(self, format, request), fields(format = %format))]
    pub async fn decode(&self, format: DataFormat, request: DecodeRequest) -> Result<DecodeOutcome> {
        self.requests.fetch_add(1, Ordering::Relaxed);
        let DecodeRequest { source, options } = request;
        let progress = ProgressReporter::new(options.on_progress.clone());
        progress.report(DecodeStage::Init, 0.0);

        let outcome = self.decode_inner(format, &source, &options, &progress).await;
        match &outcome {
            Ok(_) => progress.report(DecodeStage::Complete, 100.0),
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Decode failed");
                progress.fail();
            }
        }
        outcome
    }

    async fn decode_inner(
        &self,
        format: DataFormat,
        source: &ByteSource,
        options: &DecodeOptions,
        progress: &ProgressReporter,
    ) -> Result<DecodeOutcome> {
        if options.chunk_size == Some(0) {
            return Err(DecodeError::invalid_options("chunk size must be > 0"));
        }

        if !options.process {
            self.raw_requests.fetch_add(1, Ordering::Relaxed);
            return Ok(DecodeOutcome::Raw(self.resolve(source).await?));
        }

        let fingerprint = fingerprint::for_request(format, source, options);
        debug!(fingerprint = %fingerprint, "Computed request fingerprint");

        // Held until the result is stored so racing callers find it cached
        let _guard = match &self.in_flight {
            Some(in_flight) => Some(in_flight.acquire(&fingerprint).await),
            None => None,
        };

        if let Some(result) = self.results.get(&fingerprint).await {
            return Ok(DecodeOutcome::Decoded(Decoded {
                result,
                provenance: Provenance::Cache,
                fingerprint,
            }));
        }

        let bytes = inflate_if_gzip(self.resolve(source).await?)?;
        let result = self.run_decode(format, bytes, options, progress).await?;
        self.decodes.fetch_add(1, Ordering::Relaxed);

        let metadata = BlobMetadata::new(origin(&options.source), origin(&options.dataset))
            .with_format(format)
            .with_tag("kind", "decode-result");
        self.results.put(&fingerprint, &result, metadata).await;

        Ok(DecodeOutcome::Decoded(Decoded {
            result,
            provenance: Provenance::Fresh,
            fingerprint,
        }))
    }

    /// Bytes of a source: the buffer itself or the blob cache entry.
    async fn resolve(&self, source: &ByteSource) -> Result<Bytes> {
        match source {
            ByteSource::Buffer(bytes) => Ok(bytes.clone()),
            ByteSource::Reference(key) if key.trim().is_empty() => {
                Err(DecodeError::unsupported_input("empty source reference"))
            }
            ByteSource::Reference(key) => match self.blobs.get(key).await {
                Ok(Some(record)) => Ok(record.data),
                Ok(None) => Err(DecodeError::missing_source(key.clone())),
                Err(BlobCacheError::InvalidKey(k)) => Err(DecodeError::unsupported_input(
                    format!("'{}' is not a blob cache key", k),
                )),
                Err(e) => {
                    warn!(key = %key, error = %e, "Blob cache read failed");
                    Err(DecodeError::missing_source(key.clone()))
                }
            },
        }
    }

    async fn run_decode(
        &self,
        format: DataFormat,
        bytes: Bytes,
        options: &DecodeOptions,
        progress: &ProgressReporter,
    ) -> Result<DecodeResult> {
        let chunk_size = options
            .chunk_size
            .unwrap_or_else(|| self.config.default_chunk_size_bytes());
        let mut decoder =
            FormatDecoder::new(format, DecodeFilters::from_options(options), &self.config);

        if decoder.has_header() {
            progress.report(DecodeStage::Header, 0.0);
            decoder.parse_header(&bytes)?;
        }

        progress.report(DecodeStage::Processing, 0.0);
        let forward = |p: ChunkProgress| progress.report(DecodeStage::Processing, p.progress);

        let mut handler = DecodeHandler {
            decoder: &mut decoder,
            variables: &options.variables,
        };
        let output = process_in_chunks(&bytes, chunk_size, &mut handler, Some(&forward)).await?;

        info!(
            total_size = output.total_size,
            total_chunks = output.total_chunks,
            extracted = output.results.iter().sum::<usize>(),
            "Decoded input"
        );

        decoder.finish(RunSummary {
            total_size: output.total_size,
            processed_chunks: output.total_chunks,
        })
    }

    /// Tear down the pipeline and report its counters.
    pub fn shutdown(self) -> PipelineStats {
        let stats = PipelineStats {
            requests: self.requests.load(Ordering::Relaxed),
            raw_requests: self.raw_requests.load(Ordering::Relaxed),
            decodes: self.decodes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            result_cache: self.results.stats(),
        };
        info!(
            requests = stats.requests,
            decodes = stats.decodes,
            failures = stats.failures,
            cache_hit_rate = stats.result_cache.hit_rate(),
            "Decode pipeline shut down"
        );
        stats
    }
}

fn origin(label: &str) -> &str {
    if label.is_empty() {
        "unknown"
    } else {
        label
    }
}

/// Inflate gzip input (e.g. `.grib2.gz`); other input passes through.
pub fn inflate_if_gzip(bytes: Bytes) -> Result<Bytes> {
    if !bytes.starts_with(&GZIP_MAGIC) {
        return Ok(bytes);
    }

    let mut decoder = flate2::read::MultiGzDecoder::new(bytes.as_ref());
    let mut inflated = Vec::new();
    decoder
        .read_to_end(&mut inflated)
        .map_err(|e| DecodeError::format_decode(format!("gzip: {}", e)))?;

    debug!(compressed = bytes.len(), inflated = inflated.len(), "Inflated gzip input");
    Ok(Bytes::from(inflated))
}

/// Feeds chunks to the format decoder.
struct DecodeHandler<'a> {
    decoder: &'a mut FormatDecoder,
    variables: &'a [String],
}

#[async_trait]
impl ChunkHandler for DecodeHandler<'_> {
    type Output = usize;

    async fn process(&mut self, chunk: Bytes, info: ChunkInfo) -> Result<usize> {
        if !self.variables.is_empty()
            && !self
                .variables
                .iter()
                .any(|v| self.decoder.can_parse_chunk(&info, v))
        {
            return Ok(0);
        }
        self.decoder.extract(&chunk, &info)
    }

    async fn on_chunk_complete(&mut self, extracted: &usize, info: ChunkInfo) -> Result<()> {
        debug!(
            chunk = info.index,
            start = info.start,
            end = info.end,
            extracted = *extracted,
            "Chunk complete"
        );
        Ok(())
    }
}

/// Forwards stage changes to the caller's sink with non-decreasing progress.
struct ProgressReporter {
    sink: Option<ProgressSink>,
    state: std::sync::Mutex<(DecodeStage, f64)>,
}

impl ProgressReporter {
    fn new(sink: Option<ProgressSink>) -> Self {
        Self {
            sink,
            state: std::sync::Mutex::new((DecodeStage::Init, 0.0)),
        }
    }

    fn report(&self, stage: DecodeStage, progress: f64) {
        let progress = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            debug_assert!(
                state.0 == stage || state.0.can_advance_to(stage),
                "illegal decode stage transition {} -> {}",
                state.0,
                stage
            );
            state.0 = stage;
            state.1 = state.1.max(progress.clamp(0.0, 100.0));
            state.1
        };
        if let Some(sink) = &self.sink {
            sink(ProgressEvent::new(stage, progress));
        }
    }

    fn fail(&self) {
        self.report(DecodeStage::Failed, 0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_inflate_passes_plain_input_through() {
        let plain = Bytes::from_static(b"GRIB....");
        assert_eq!(inflate_if_gzip(plain.clone()).unwrap(), plain);
    }

    #[test]
    fn test_inflate_gzip() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"CDF\x01 payload").unwrap();
        let compressed = Bytes::from(encoder.finish().unwrap());

        assert_eq!(
            inflate_if_gzip(compressed).unwrap(),
            Bytes::from_static(b"CDF\x01 payload")
        );
    }

    #[test]
    fn test_inflate_corrupt_gzip_fails() {
        let corrupt = Bytes::from_static(&[0x1f, 0x8b, 0x08, 0x00, 0xff]);
        assert!(matches!(
            inflate_if_gzip(corrupt),
            Err(DecodeError::FormatDecode(_))
        ));
    }

    #[test]
    fn test_progress_reporter_never_decreases() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink: ProgressSink = {
            let seen = seen.clone();
            Arc::new(move |e: ProgressEvent| seen.lock().unwrap().push(e.progress))
        };
        let reporter = ProgressReporter::new(Some(sink));
        reporter.report(DecodeStage::Processing, 50.0);
        reporter.report(DecodeStage::Processing, 20.0);
        reporter.fail();

        assert_eq!(*seen.lock().unwrap(), vec![50.0, 50.0, 50.0]);
    }
}
