//! Subcommand handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use blob_cache::{BlobMetadata, RawBlobCache};
use bytes::Bytes;
use decode_pipeline::{
    inflate_if_gzip, ByteSource, DecodeOptions, DecodeOutcome, DecodePipeline, DecodeRequest,
    DecodeResult, DecoderConfig,
};
use grid_common::{BoundingBox, DataFormat, TimeRange};
use serde_json::{json, Value};
use tokio_util::io::ReaderStream;
use tracing::info;

#[derive(clap::Args, Debug)]
pub struct DecodeArgs {
    /// File path, or a cache key with --reference
    pub input: String,

    /// Treat INPUT as a blob cache key
    #[arg(long)]
    pub reference: bool,

    /// netcdf or grib2 (default: from magic bytes or extension)
    #[arg(short, long)]
    pub format: Option<String>,

    /// Comma-separated variable or parameter names
    #[arg(short, long, value_delimiter = ',')]
    pub variables: Vec<String>,

    /// west,south,east,north
    #[arg(long)]
    pub bbox: Option<String>,

    /// start/end in ISO 8601
    #[arg(long)]
    pub time_range: Option<String>,

    /// Chunk size in megabytes
    #[arg(long, env = "DECODE_CHUNK_SIZE_MB")]
    pub chunk_size_mb: Option<usize>,

    /// Skip decoding; emit the raw bytes
    #[arg(long)]
    pub raw: bool,

    /// Leave data arrays out of the output
    #[arg(long)]
    pub summary: bool,

    /// Write output here instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    #[arg(long, default_value = "local")]
    pub source: String,

    #[arg(long, default_value = "")]
    pub dataset: String,
}

#[derive(clap::Args, Debug)]
pub struct IngestArgs {
    pub path: PathBuf,

    /// Cache key (default: derived from path, source and dataset)
    #[arg(long)]
    pub key: Option<String>,

    #[arg(long, default_value = "local")]
    pub source: String,

    /// Dataset name (default: file stem)
    #[arg(long)]
    pub dataset: Option<String>,
}

/// Format from the flag, else the stored or file-name hint, else leading bytes.
fn resolve_format(flag: Option<&str>, hint: Option<DataFormat>, bytes: &Bytes) -> Result<DataFormat> {
    if let Some(flag) = flag {
        return DataFormat::from_name(flag).ok_or_else(|| anyhow!("unknown format '{}'", flag));
    }
    if let Some(format) = hint {
        return Ok(format);
    }
    let inflated = inflate_if_gzip(bytes.clone())?;
    DataFormat::detect(&inflated).ok_or_else(|| anyhow!("cannot detect format, pass --format"))
}

fn build_options(args: &DecodeArgs) -> Result<DecodeOptions> {
    let mut options = DecodeOptions::new()
        .with_variables(args.variables.iter().map(|v| v.trim()).filter(|v| !v.is_empty()))
        .with_origin(&args.source, &args.dataset);

    if let Some(bbox) = &args.bbox {
        options = options.with_bbox(BoundingBox::parse(bbox)?);
    }
    if let Some(range) = &args.time_range {
        options = options.with_time_range(TimeRange::parse(range)?);
    }
    if let Some(mb) = args.chunk_size_mb {
        if mb == 0 {
            bail!("--chunk-size-mb must be > 0");
        }
        options = options.with_chunk_size(mb * 1024 * 1024);
    }
    if args.raw {
        options = options.raw();
    }
    Ok(options)
}

/// Replace every data array with its length.
fn summarize(result: &DecodeResult) -> Result<Value> {
    let mut value = serde_json::to_value(result)?;

    if let Some(variables) = value.get_mut("variables").and_then(Value::as_object_mut) {
        for variable in variables.values_mut() {
            strip_data(variable);
        }
    }
    if let Some(messages) = value.get_mut("messages").and_then(Value::as_array_mut) {
        for message in messages {
            strip_data(message);
        }
    }
    Ok(value)
}

fn strip_data(entry: &mut Value) {
    if let Some(obj) = entry.as_object_mut() {
        let count = obj
            .remove("data")
            .and_then(|d| d.as_array().map(Vec::len))
            .unwrap_or(0);
        obj.insert("value_count".to_string(), json!(count));
    }
}

async fn write_output(output: Option<&Path>, bytes: &[u8]) -> Result<()> {
    match output {
        Some(path) => tokio::fs::write(path, bytes)
            .await
            .with_context(|| format!("writing {}", path.display())),
        None => {
            println!("{}", String::from_utf8_lossy(bytes));
            Ok(())
        }
    }
}

pub async fn decode(cache: Arc<RawBlobCache>, args: DecodeArgs) -> Result<()> {
    let (source, probe, hint) = if args.reference {
        let record = cache
            .get(&args.input)
            .await?
            .ok_or_else(|| anyhow!("no cache entry '{}'", args.input))?;
        (ByteSource::Reference(args.input.clone()), record.data, record.metadata.format)
    } else {
        let bytes = Bytes::from(
            tokio::fs::read(&args.input)
                .await
                .with_context(|| format!("reading {}", args.input))?,
        );
        let hint = DataFormat::from_path(&args.input);
        (ByteSource::Buffer(bytes.clone()), bytes, hint)
    };
    let format = resolve_format(args.format.as_deref(), hint, &probe)?;
    drop(probe);

    let options = build_options(&args)?;
    let pipeline = DecodePipeline::new(cache, DecoderConfig::from_env())?;
    let outcome = pipeline
        .decode(format, DecodeRequest { source, options })
        .await?;

    match outcome {
        DecodeOutcome::Raw(bytes) => match &args.output {
            Some(path) => write_output(Some(path), &bytes).await?,
            None => println!("{}", json!({ "format": format, "size": bytes.len() })),
        },
        DecodeOutcome::Decoded(decoded) => {
            let result = if args.summary {
                summarize(&decoded.result)?
            } else {
                serde_json::to_value(&decoded.result)?
            };
            let document = json!({
                "fingerprint": decoded.fingerprint,
                "provenance": decoded.provenance,
                "result": result,
            });
            write_output(args.output.as_deref(), &serde_json::to_vec_pretty(&document)?).await?;
        }
    }

    let stats = pipeline.shutdown();
    info!(
        decodes = stats.decodes,
        cache_hits = stats.result_cache.hits,
        "Done"
    );
    Ok(())
}

pub async fn ingest(cache: &RawBlobCache, args: IngestArgs) -> Result<()> {
    let dataset = args.dataset.clone().unwrap_or_else(|| {
        args.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    });
    let mut metadata = BlobMetadata::new(&args.source, dataset)
        .with_tag("path", args.path.display().to_string());
    if let Some(format) = DataFormat::from_path(&args.path.to_string_lossy()) {
        metadata = metadata.with_format(format);
    }

    let key = match &args.key {
        Some(key) => key.clone(),
        None => RawBlobCache::generate_cache_key(&args.path.to_string_lossy(), &metadata),
    };

    let file = tokio::fs::File::open(&args.path)
        .await
        .with_context(|| format!("opening {}", args.path.display()))?;
    let manifest = cache
        .download_chunked(&key, ReaderStream::new(file), metadata)
        .await?;

    println!(
        "{}",
        json!({
            "key": key,
            "total_size": manifest.total_size,
            "total_chunks": manifest.total_chunks,
        })
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::{Grib2Builder, NcKind, NetCdfBuilder};

    fn decode_args(input: &str) -> DecodeArgs {
        DecodeArgs {
            input: input.to_string(),
            reference: false,
            format: None,
            variables: Vec::new(),
            bbox: None,
            time_range: None,
            chunk_size_mb: None,
            raw: false,
            summary: false,
            output: None,
            source: "local".to_string(),
            dataset: String::new(),
        }
    }

    #[test]
    fn test_resolve_format() {
        let grib = Bytes::from(Grib2Builder::new().build());
        assert_eq!(
            resolve_format(Some("netcdf"), Some(DataFormat::Grib2), &grib).unwrap(),
            DataFormat::NetCdf
        );
        assert_eq!(
            resolve_format(None, Some(DataFormat::Grib2), &Bytes::new()).unwrap(),
            DataFormat::Grib2
        );
        assert_eq!(resolve_format(None, None, &grib).unwrap(), DataFormat::Grib2);
        assert!(resolve_format(None, None, &Bytes::from_static(b"????")).is_err());
        assert!(resolve_format(Some("zarr"), None, &grib).is_err());
    }

    #[test]
    fn test_build_options() {
        let mut args = decode_args("f.nc");
        args.variables = vec!["t2m".to_string(), " ".to_string()];
        args.bbox = Some("-10,40,5,55".to_string());
        args.chunk_size_mb = Some(2);

        let options = build_options(&args).unwrap();
        assert_eq!(options.variables, vec!["t2m"]);
        assert_eq!(options.bbox, Some(BoundingBox::new(-10.0, 40.0, 5.0, 55.0)));
        assert_eq!(options.chunk_size, Some(2 * 1024 * 1024));
        assert!(options.process);

        args.chunk_size_mb = Some(0);
        assert!(build_options(&args).is_err());
    }

    #[tokio::test]
    async fn test_ingest_then_decode_by_reference() {
        let dir = test_utils::temp_test_dir();
        let path = dir.path().join("sample.nc");
        let bytes = NetCdfBuilder::classic()
            .dimension("lat", 2)
            .dimension("lon", 3)
            .variable("temperature", &["lat", "lon"], NcKind::Float, vec![1.0; 6])
            .build();
        std::fs::write(&path, &bytes).unwrap();

        let cache = Arc::new(RawBlobCache::in_memory());
        ingest(
            &cache,
            IngestArgs {
                path: path.clone(),
                key: Some("raw-sample".to_string()),
                source: "local".to_string(),
                dataset: None,
            },
        )
        .await
        .unwrap();

        let stored = cache.get("raw-sample").await.unwrap().unwrap();
        assert_eq!(stored.data.as_ref(), bytes.as_slice());
        assert_eq!(stored.metadata.dataset, "sample");
        assert_eq!(stored.metadata.format, Some(DataFormat::NetCdf));

        let out = dir.path().join("out.json");
        let mut args = decode_args("raw-sample");
        args.reference = true;
        args.summary = true;
        args.output = Some(out.clone());
        decode(cache, args).await.unwrap();

        let document: Value = serde_json::from_slice(&std::fs::read(&out).unwrap()).unwrap();
        assert_eq!(document["provenance"], "fresh");
        let temperature = &document["result"]["variables"]["temperature"];
        assert_eq!(temperature["metadata"]["dimensions"], json!([2, 3]));
        assert_eq!(temperature["value_count"], 6);
        assert!(temperature.get("data").is_none());
    }
}
