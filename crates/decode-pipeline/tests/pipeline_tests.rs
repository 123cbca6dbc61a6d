//! End-to-end tests of DecodePipeline over in-memory and failing stores.

use std::io::Write;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use blob_cache::{
    BlobBackend, BlobCacheConfig, BlobCacheError, BlobCacheResult, BlobMetadata, RawBlobCache,
};
use bytes::Bytes;
use decode_pipeline::{
    DecodeError, DecodeOptions, DecodeOutcome, DecodePipeline, DecodeRequest, DecodeStage,
    Decoded, DecoderConfig, ProgressEvent, Provenance,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use grid_common::{BoundingBox, DataFormat};
use test_utils::{set_dimension_length, set_num_records, Grib2Builder, NcKind, NetCdfBuilder};
use tokio_test::{assert_err, assert_ok};

const MIB: usize = 1024 * 1024;

fn pipeline() -> DecodePipeline {
    DecodePipeline::new(Arc::new(RawBlobCache::in_memory()), DecoderConfig::default()).unwrap()
}

fn temperature_netcdf() -> Bytes {
    let temperature: Vec<f64> = (0..100).map(|i| 250.0 + i as f64).collect();
    let pressure: Vec<f64> = (0..100).map(|i| 100_000.0 - i as f64 * 10.0).collect();
    Bytes::from(
        NetCdfBuilder::classic()
            .dimension("lat", 10)
            .dimension("lon", 10)
            .global_text("title", "synthetic")
            .variable("temperature", &["lat", "lon"], NcKind::Float, temperature)
            .text_attribute("units", "K")
            .variable("pressure", &["lat", "lon"], NcKind::Double, pressure)
            .build(),
    )
}

fn grib_file() -> Bytes {
    let mut file = Grib2Builder::new().with_constant_value(288.0).build();
    file.extend(Grib2Builder::new().with_parameter(2, 3).with_constant_value(-4.0).build());
    Bytes::from(file)
}

fn decoded(outcome: DecodeOutcome) -> Decoded {
    outcome.into_decoded().expect("expected a decoded outcome")
}

#[tokio::test]
async fn test_netcdf_temperature_dimensions() {
    let pipeline = pipeline();
    let options = DecodeOptions::new().with_variables(["temperature"]);

    let outcome = assert_ok!(
        pipeline
            .decode(DataFormat::NetCdf, DecodeRequest::buffer(temperature_netcdf(), options))
            .await
    );
    let decoded = decoded(outcome);
    assert_eq!(decoded.provenance, Provenance::Fresh);
    assert!(decoded.fingerprint.starts_with("processed-netcdf-"));

    let netcdf = decoded.result.as_netcdf().unwrap();
    assert_eq!(netcdf.variables.len(), 1);
    let temperature = &netcdf.variables["temperature"];
    assert_eq!(temperature.metadata.dimensions, vec![10, 10]);
    assert_eq!(temperature.metadata.dimension_names, vec!["lat", "lon"]);
    assert_eq!(temperature.data[42], Some(292.0));
}

#[tokio::test]
async fn test_netcdf_all_variables_when_none_requested() {
    let pipeline = pipeline();
    let bbox = BoundingBox::new(-10.0, 40.0, 10.0, 60.0);
    let options = DecodeOptions::new().with_bbox(bbox).with_chunk_size(33);

    let decoded = decoded(
        pipeline
            .decode(DataFormat::NetCdf, DecodeRequest::buffer(temperature_netcdf(), options))
            .await
            .unwrap(),
    );
    let netcdf = decoded.result.as_netcdf().unwrap();

    let names: Vec<_> = netcdf.variables.keys().cloned().collect();
    assert_eq!(names, vec!["pressure", "temperature"]);
    assert_eq!(netcdf.variables["pressure"].data[99], Some(100_000.0 - 990.0));
    // Filters are echoed, not applied
    assert_eq!(netcdf.metadata.bbox, Some(bbox));
    assert_eq!(netcdf.variables["temperature"].data.len(), 100);
}

#[tokio::test]
async fn test_netcdf_record_variables_across_chunks() {
    let temp: Vec<f64> = (0..12).map(|i| i as f64).collect();
    let wind: Vec<f64> = (0..12).map(|i| 100.0 + i as f64).collect();
    let buffer = Bytes::from(
        NetCdfBuilder::offset64()
            .record_dimension("time", 3)
            .dimension("y", 2)
            .dimension("x", 2)
            .variable("temp", &["time", "y", "x"], NcKind::Short, temp.clone())
            .number_attribute("_FillValue", 5.0)
            .variable("wind", &["time", "y", "x"], NcKind::Int, wind.clone())
            .build(),
    );

    let pipeline = pipeline();
    let options = DecodeOptions::new().with_chunk_size(5);
    let decoded = decoded(
        pipeline
            .decode(DataFormat::NetCdf, DecodeRequest::buffer(buffer, options))
            .await
            .unwrap(),
    );
    let netcdf = decoded.result.as_netcdf().unwrap();

    let temp_out = &netcdf.variables["temp"];
    assert_eq!(temp_out.metadata.dimensions, vec![3, 2, 2]);
    assert_eq!(temp_out.metadata.data_type, "short");
    let expected: Vec<Option<f64>> = temp
        .iter()
        .map(|&v| if v == 5.0 { None } else { Some(v) })
        .collect();
    assert_eq!(temp_out.data, expected);

    let wind_out: Vec<f64> = netcdf.variables["wind"].data.iter().flatten().copied().collect();
    assert_eq!(wind_out, wind);
}

#[tokio::test]
async fn test_grib_bbox_matching_nothing() {
    let pipeline = pipeline();
    let options = DecodeOptions::new().with_bbox(BoundingBox::new(100.0, -40.0, 150.0, -10.0));

    let decoded = decoded(
        pipeline
            .decode(DataFormat::Grib2, DecodeRequest::buffer(grib_file(), options))
            .await
            .unwrap(),
    );
    let grib = decoded.result.as_grib2().unwrap();
    assert!(grib.messages.is_empty());
    assert_eq!(grib.metadata.message_count, 0);
}

#[tokio::test]
async fn test_grib_messages_split_by_chunks() {
    let pipeline = pipeline();
    let options = DecodeOptions::new().with_chunk_size(41);

    let decoded = decoded(
        pipeline
            .decode(DataFormat::Grib2, DecodeRequest::buffer(grib_file(), options))
            .await
            .unwrap(),
    );
    let grib = decoded.result.as_grib2().unwrap();

    assert_eq!(grib.metadata.message_count, 2);
    let params: Vec<_> = grib.messages.iter().map(|m| m.message.parameter.as_str()).collect();
    assert_eq!(params, vec!["TMP", "VGRD"]);
    assert!(grib.messages[1].data.iter().all(|v| *v == Some(-4.0)));
    assert!(grib.messages[0].chunk_info.index < grib.messages[1].chunk_info.index);
}

#[tokio::test]
async fn test_grib_missing_forecast_time_still_decodes() {
    let buffer = Bytes::from(Grib2Builder::new().with_forecast_hour(u32::MAX).build());
    let options = DecodeOptions::new().with_chunk_size(64);

    let decoded = decoded(assert_ok!(
        pipeline()
            .decode(DataFormat::Grib2, DecodeRequest::buffer(buffer, options))
            .await
    ));
    let grib = decoded.result.as_grib2().unwrap();
    assert_eq!(grib.messages.len(), 1);
    assert_eq!(grib.messages[0].message.valid_time, None);
    assert_eq!(grib.messages[0].message.forecast_hour, None);
    assert_eq!(grib.messages[0].data.len(), 100);
}

#[tokio::test]
async fn test_netcdf_dimensions_past_offset_range_rejected() {
    let mut file = NetCdfBuilder::classic()
        .dimension("a", 1)
        .dimension("b", 1)
        .dimension("c", 1)
        .variable("v", &["a", "b", "c"], NcKind::Int, vec![7.0])
        .build();
    for index in 0..3 {
        set_dimension_length(&mut file, index, 0x7FFF_FFFF);
    }

    let err = assert_err!(
        pipeline()
            .decode(
                DataFormat::NetCdf,
                DecodeRequest::buffer(Bytes::from(file), DecodeOptions::new()),
            )
            .await
    );
    assert!(matches!(err, DecodeError::FormatDecode(_)));
}

#[tokio::test]
async fn test_netcdf_huge_record_count_fails_as_truncated() {
    let mut file = NetCdfBuilder::classic()
        .record_dimension("time", 2)
        .variable("obs", &["time"], NcKind::Double, vec![1.0, 2.0])
        .build();
    set_num_records(&mut file, 0xFFFF_FFFE);

    let err = assert_err!(
        pipeline()
            .decode(
                DataFormat::NetCdf,
                DecodeRequest::buffer(Bytes::from(file), DecodeOptions::new()),
            )
            .await
    );
    match err {
        DecodeError::FormatDecode(msg) => assert!(msg.contains("truncated"), "{}", msg),
        other => panic!("unexpected error {:?}", other),
    }
}

#[tokio::test]
async fn test_25_mib_buffer_in_10_mib_chunks() {
    let mut file = Grib2Builder::new().build();
    file.resize(25 * MIB, 0);

    let pipeline = pipeline();
    let options = DecodeOptions::new().with_chunk_size(10 * MIB);
    let decoded = decoded(
        pipeline
            .decode(DataFormat::Grib2, DecodeRequest::buffer(file, options))
            .await
            .unwrap(),
    );
    let grib = decoded.result.as_grib2().unwrap();

    assert_eq!(grib.metadata.processed_chunks, 3);
    assert_eq!(grib.metadata.total_size, (25 * MIB) as u64);
    assert_eq!(grib.metadata.message_count, 1);
}

#[tokio::test]
async fn test_second_decode_served_from_cache() {
    let pipeline = pipeline();
    let request = || {
        DecodeRequest::buffer(
            grib_file(),
            DecodeOptions::new().with_variables(["VGRD", "TMP"]),
        )
    };

    let first = decoded(pipeline.decode(DataFormat::Grib2, request()).await.unwrap());
    let second = decoded(pipeline.decode(DataFormat::Grib2, request()).await.unwrap());

    assert_eq!(first.provenance, Provenance::Fresh);
    assert_eq!(second.provenance, Provenance::Cache);
    assert_eq!(first.fingerprint, second.fingerprint);
    assert_eq!(first.result, second.result);

    let stats = pipeline.shutdown();
    assert_eq!(stats.decodes, 1);
    assert_eq!(stats.requests, 2);
    assert_eq!(stats.result_cache.hits, 1);
}

#[tokio::test]
async fn test_progress_ends_at_100() {
    let events = Arc::new(Mutex::new(Vec::<ProgressEvent>::new()));
    let sink = events.clone();
    let options = DecodeOptions::new()
        .with_chunk_size(64)
        .with_progress(move |e| sink.lock().unwrap().push(e));

    pipeline()
        .decode(DataFormat::NetCdf, DecodeRequest::buffer(temperature_netcdf(), options))
        .await
        .unwrap();

    let events = events.lock().unwrap();
    assert_eq!(events.first().map(|e| e.stage), Some(DecodeStage::Init));
    assert!(events.iter().any(|e| e.stage == DecodeStage::Header));
    assert!(events.windows(2).all(|w| w[0].progress <= w[1].progress));

    let last = events.last().unwrap();
    assert_eq!(last.stage, DecodeStage::Complete);
    assert_eq!(last.progress, 100.0);
}

#[tokio::test]
async fn test_failed_decode_reports_failure() {
    let events = Arc::new(Mutex::new(Vec::<ProgressEvent>::new()));
    let sink = events.clone();
    let full = temperature_netcdf();
    let truncated = full.slice(..full.len() - 100);
    let options = DecodeOptions::new().with_progress(move |e| sink.lock().unwrap().push(e));

    let err = assert_err!(
        pipeline()
            .decode(DataFormat::NetCdf, DecodeRequest::buffer(truncated, options))
            .await
    );
    assert!(matches!(err, DecodeError::FormatDecode(_)));
    assert_eq!(
        events.lock().unwrap().last().map(|e| e.stage),
        Some(DecodeStage::Failed)
    );
}

#[tokio::test]
async fn test_reference_sources() {
    let blobs = Arc::new(RawBlobCache::in_memory());
    blobs
        .put("raw-noaa-gfs-1", grib_file(), BlobMetadata::new("noaa", "gfs"))
        .await
        .unwrap();
    let pipeline = DecodePipeline::new(blobs, DecoderConfig::default()).unwrap();

    let found = pipeline
        .decode(
            DataFormat::Grib2,
            DecodeRequest::reference("raw-noaa-gfs-1", DecodeOptions::new()),
        )
        .await
        .unwrap();
    assert_eq!(
        decoded(found).result.as_grib2().unwrap().metadata.message_count,
        2
    );

    let missing = pipeline
        .decode(
            DataFormat::Grib2,
            DecodeRequest::reference("raw-noaa-gfs-2", DecodeOptions::new()),
        )
        .await;
    assert!(matches!(missing, Err(DecodeError::MissingSource(_))));

    let bogus = pipeline
        .decode(
            DataFormat::Grib2,
            DecodeRequest::reference("s3://not/a/key", DecodeOptions::new()),
        )
        .await;
    assert!(matches!(bogus, Err(DecodeError::UnsupportedInput(_))));
}

#[tokio::test]
async fn test_raw_mode_skips_decode_and_cache() {
    let pipeline = pipeline();
    let bytes = grib_file();

    let outcome = pipeline
        .decode(
            DataFormat::Grib2,
            DecodeRequest::buffer(bytes.clone(), DecodeOptions::new().raw()),
        )
        .await
        .unwrap();
    assert_eq!(outcome.into_raw(), Some(bytes));

    let stats = pipeline.shutdown();
    assert_eq!(stats.raw_requests, 1);
    assert_eq!(stats.decodes, 0);
    assert_eq!(stats.result_cache.writes, 0);
}

#[tokio::test]
async fn test_zero_chunk_size_rejected() {
    let result = pipeline()
        .decode(
            DataFormat::Grib2,
            DecodeRequest::buffer(grib_file(), DecodeOptions::new().with_chunk_size(0)),
        )
        .await;
    assert!(matches!(result, Err(DecodeError::InvalidOptions(_))));
}

#[tokio::test]
async fn test_gzip_input() {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&grib_file()).unwrap();
    let compressed = encoder.finish().unwrap();

    let decoded = decoded(
        pipeline()
            .decode(
                DataFormat::Grib2,
                DecodeRequest::buffer(compressed, DecodeOptions::new()),
            )
            .await
            .unwrap(),
    );
    assert_eq!(decoded.result.as_grib2().unwrap().metadata.message_count, 2);
}

#[tokio::test]
async fn test_concurrent_identical_requests_decode_once() {
    let pipeline = Arc::new(pipeline());
    let request = || DecodeRequest::buffer(grib_file(), DecodeOptions::new().with_chunk_size(16));

    let (a, b) = futures::join!(
        pipeline.decode(DataFormat::Grib2, request()),
        pipeline.decode(DataFormat::Grib2, request())
    );
    let mut provenances = vec![
        decoded(a.unwrap()).provenance,
        decoded(b.unwrap()).provenance,
    ];
    provenances.sort_by_key(|p| *p == Provenance::Cache);
    assert_eq!(provenances, vec![Provenance::Fresh, Provenance::Cache]);

    let stats = Arc::try_unwrap(pipeline).ok().unwrap().shutdown();
    assert_eq!(stats.decodes, 1);
}

/// Backend whose every operation fails.
struct BrokenBackend;

#[async_trait]
impl BlobBackend for BrokenBackend {
    fn name(&self) -> &str {
        "broken"
    }

    fn max_entry_size(&self) -> usize {
        usize::MAX
    }

    async fn read(&self, _key: &str) -> BlobCacheResult<Option<Bytes>> {
        Err(BlobCacheError::backend("read refused"))
    }

    async fn write(&self, _key: &str, _data: Bytes) -> BlobCacheResult<()> {
        Err(BlobCacheError::backend("write refused"))
    }

    async fn remove(&self, _key: &str) -> BlobCacheResult<()> {
        Err(BlobCacheError::backend("remove refused"))
    }

    async fn list(&self, _prefix: &str) -> BlobCacheResult<Vec<String>> {
        Err(BlobCacheError::backend("list refused"))
    }

    async fn clear(&self) -> BlobCacheResult<()> {
        Err(BlobCacheError::backend("clear refused"))
    }
}

#[tokio::test]
async fn test_broken_store_never_fails_decode() {
    let blobs = RawBlobCache::new(Arc::new(BrokenBackend), BlobCacheConfig::default()).unwrap();
    let pipeline = DecodePipeline::new(Arc::new(blobs), DecoderConfig::default()).unwrap();
    let request = || DecodeRequest::buffer(grib_file(), DecodeOptions::new());

    let first = decoded(pipeline.decode(DataFormat::Grib2, request()).await.unwrap());
    let second = decoded(pipeline.decode(DataFormat::Grib2, request()).await.unwrap());

    assert_eq!(first.provenance, Provenance::Fresh);
    assert_eq!(second.provenance, Provenance::Fresh);
    assert_eq!(first.result, second.result);

    let stats = pipeline.shutdown();
    assert_eq!(stats.decodes, 2);
    assert_eq!(stats.result_cache.failed_writes, 2);
    assert_eq!(stats.result_cache.read_errors, 2);
}

#[tokio::test]
async fn test_persistent_result_cache_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let open = || {
        let backend = blob_cache::ObjectStoreBackend::local(dir.path()).unwrap();
        let blobs = RawBlobCache::new(Arc::new(backend), BlobCacheConfig::default()).unwrap();
        DecodePipeline::new(Arc::new(blobs), DecoderConfig::default()).unwrap()
    };
    let request = || DecodeRequest::buffer(temperature_netcdf(), DecodeOptions::new());

    let first = decoded(open().decode(DataFormat::NetCdf, request()).await.unwrap());
    let second = decoded(open().decode(DataFormat::NetCdf, request()).await.unwrap());

    assert_eq!(first.provenance, Provenance::Fresh);
    assert_eq!(second.provenance, Provenance::Cache);
    assert_eq!(first.result, second.result);
}
