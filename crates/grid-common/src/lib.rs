//! Common types shared across the decode workspace.

pub mod bbox;
pub mod format;
pub mod hash;
pub mod time;

pub use bbox::{normalize_longitude, BboxParseError, BoundingBox};
pub use format::DataFormat;
pub use hash::{rolling_hash, rolling_hash_abs};
pub use time::{parse_iso8601, TimeParseError, TimeRange};
