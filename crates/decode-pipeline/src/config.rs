//! Configuration for the decode pipeline.

use serde::{Deserialize, Serialize};

/// Configuration for [`crate::DecodePipeline`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecoderConfig {
    /// Chunk size used when a request does not set one, in megabytes.
    pub default_chunk_size_mb: usize,

    /// Leading window read for the NetCDF header, in bytes. Grown on demand
    /// when a header does not fit.
    pub header_window_bytes: usize,

    /// Serialize concurrent decodes of the same fingerprint so only one of
    /// them does the work.
    pub dedupe_in_flight: bool,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            default_chunk_size_mb: 10,
            header_window_bytes: 1024 * 1024,
            dedupe_in_flight: true,
        }
    }
}

impl DecoderConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("DECODE_CHUNK_SIZE_MB") {
            if let Ok(size) = val.parse() {
                config.default_chunk_size_mb = size;
            }
        }

        if let Ok(val) = std::env::var("DECODE_HEADER_WINDOW_BYTES") {
            if let Ok(size) = val.parse() {
                config.header_window_bytes = size;
            }
        }

        if let Ok(val) = std::env::var("DECODE_DEDUPE_IN_FLIGHT") {
            config.dedupe_in_flight = val.to_lowercase() == "true" || val == "1";
        }

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.default_chunk_size_mb == 0 {
            return Err("default_chunk_size_mb must be > 0".to_string());
        }

        if self.header_window_bytes == 0 {
            return Err("header_window_bytes must be > 0".to_string());
        }

        Ok(())
    }

    pub fn default_chunk_size_bytes(&self) -> usize {
        self.default_chunk_size_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = DecoderConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_chunk_size_bytes(), 10 * 1024 * 1024);
        assert_eq!(config.header_window_bytes, 1024 * 1024);
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let config = DecoderConfig {
            default_chunk_size_mb: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = DecoderConfig {
            header_window_bytes: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
