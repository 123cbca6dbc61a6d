//! Deterministic request fingerprints used as result cache keys.
//!
//! A fingerprint is `processed-{format}-{n}` where `n` is the absolute value
//! of a 32-bit rolling hash over the source identity, the format and the
//! canonical JSON form of the parameters. It is not collision resistant; a
//! collision serves the cached result of a different request.

use grid_common::{rolling_hash_abs, DataFormat};
use serde_json::{json, Value};

use crate::types::{ByteSource, DecodeOptions};

/// Fingerprint of a source descriptor, format and parameter object.
pub fn generate_key(source_descriptor: &str, format: DataFormat, params: &Value) -> String {
    let material = format!("{}|{}|{}", source_descriptor, format, canonical_json(params));
    format!("processed-{}-{}", format, rolling_hash_abs(&material))
}

/// Fingerprint of a decode request.
pub fn for_request(format: DataFormat, source: &ByteSource, options: &DecodeOptions) -> String {
    generate_key(&source_identity(source), format, &request_params(options))
}

/// Stable identity of a byte source: the cache key of a reference, or
/// `buffer:{len}:{crc32}` of supplied bytes.
pub fn source_identity(source: &ByteSource) -> String {
    match source {
        ByteSource::Buffer(bytes) => {
            format!("buffer:{}:{:08x}", bytes.len(), crc32fast::hash(bytes))
        }
        ByteSource::Reference(key) => key.clone(),
    }
}

/// The parameters that change what a decode returns.
///
/// Chunk size and the progress sink are left out: they change how the work
/// is done, not its result.
pub fn request_params(options: &DecodeOptions) -> Value {
    let mut variables = options.variables.clone();
    variables.sort();
    variables.dedup();

    json!({
        "variables": variables,
        "bbox": options.bbox.map(|b| b.to_array()),
        "timeRange": options.time_range.map(|t| json!({
            "start": t.start.to_rfc3339(),
            "end": t.end.to_rfc3339(),
        })),
    })
}

/// Serialize with object keys sorted at every level.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));

            out.push('{');
            for (i, (key, val)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(val, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}
