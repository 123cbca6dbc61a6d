//! Reader for NetCDF classic (CDF-1) and 64-bit offset (CDF-2) files.
//!
//! The header is parsed once from a leading window of the file; variable
//! data is then pulled out of arbitrary consecutive windows with
//! [`VariableReader`], so the file never has to be walked as a whole.
//! NetCDF-4 (HDF5) and CDF-5 files are rejected.

pub mod error;
pub mod extract;
pub mod header;

pub use error::{NetCdfError, NetCdfResult};
pub use extract::VariableReader;
pub use header::{
    parse_header, Attribute, AttributeValue, Dimension, Extent, FormatVersion, NcType,
    NetCdfHeader, Variable,
};
