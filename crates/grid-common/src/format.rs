//! Supported binary container formats.

use serde::{Deserialize, Serialize};

/// Scientific file formats understood by the decode pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataFormat {
    /// NetCDF classic / 64-bit offset.
    NetCdf,
    /// WMO GRIB edition 2.
    Grib2,
}

impl DataFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataFormat::NetCdf => "netcdf",
            DataFormat::Grib2 => "grib2",
        }
    }

    /// Parse from a format name (case-insensitive).
    pub fn from_name(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "netcdf" | "nc" | "cdf" => Some(DataFormat::NetCdf),
            "grib2" | "grib" | "grb2" => Some(DataFormat::Grib2),
            _ => None,
        }
    }

    /// Sniff the format from leading bytes.
    ///
    /// NetCDF-4 (HDF5) files are reported as NetCDF so the decoder can reject
    /// them with a precise error.
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        if bytes.starts_with(b"CDF") || bytes.starts_with(b"\x89HDF") {
            return Some(DataFormat::NetCdf);
        }
        // GRIB files may carry a WMO bulletin header before the first message.
        let probe = &bytes[..bytes.len().min(256)];
        if probe.windows(4).any(|w| w == b"GRIB") {
            return Some(DataFormat::Grib2);
        }
        None
    }

    /// Guess the format from a file name.
    pub fn from_path(path: &str) -> Option<Self> {
        let lower = path.to_lowercase();
        let lower = lower.strip_suffix(".gz").unwrap_or(&lower);

        if lower.ends_with(".grib2") || lower.ends_with(".grb2") || lower.ends_with(".grib") {
            Some(DataFormat::Grib2)
        } else if lower.ends_with(".nc") || lower.ends_with(".nc4") || lower.ends_with(".netcdf") {
            Some(DataFormat::NetCdf)
        } else {
            None
        }
    }
}

impl std::fmt::Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
