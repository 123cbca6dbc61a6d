//! Error types for NetCDF parsing operations.

use thiserror::Error;

/// Result type for NetCDF parser operations.
pub type NetCdfResult<T> = Result<T, NetCdfError>;

/// Error types for NetCDF parsing.
#[derive(Error, Debug)]
pub enum NetCdfError {
    /// Invalid data format
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    /// A well-formed file in a flavour this parser does not read
    #[error("Unsupported NetCDF variant: {0}")]
    Unsupported(String),

    /// The header extends past the bytes supplied
    #[error("Header is incomplete: needed more than {available} bytes")]
    Incomplete { available: usize },

    /// Missing required variable or attribute
    #[error("Missing required data: {0}")]
    MissingData(String),
}

impl NetCdfError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }
}
