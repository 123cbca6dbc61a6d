//! GRIB2 message parsing and decoding.
//!
//! Provides framing of GRIB2 messages in a byte stream, cheap parsing of the
//! metadata sections used for filtering, and unpacking of the data section.

pub mod scanner;
pub mod sections;
pub mod tables;
pub mod unpacking;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use grid_common::BoundingBox;
use thiserror::Error;

pub use scanner::{Grib2Reader, MessageScanner, RawMessage};
pub use sections::{
    decode_grib2_signed, DataRepresentation, GridDefinition, Identification, Indicator,
    ProductDefinition,
};

use sections::Bitmap;

#[derive(Debug, Error)]
pub enum Grib2Error {
    #[error("Invalid GRIB2 format: {0}")]
    InvalidFormat(String),

    #[error("Invalid section {section}: {reason}")]
    InvalidSection { section: u8, reason: String },

    #[error("Unpacking error: {0}")]
    UnpackingError(String),
}

pub type Grib2Result<T> = Result<T, Grib2Error>;

/// A single GRIB2 message with its metadata sections parsed.
///
/// The data section is only unpacked on demand, so messages can be filtered
/// without paying for decoding.
#[derive(Debug, Clone)]
pub struct Grib2Message {
    /// Absolute byte offset of the message in its file.
    pub offset: u64,
    pub raw: Bytes,
    pub indicator: Indicator,
    pub identification: Identification,
    pub grid_definition: GridDefinition,
    pub product_definition: ProductDefinition,
}

impl Grib2Message {
    /// Parse the metadata sections of a framed message.
    pub fn parse(raw: RawMessage) -> Grib2Result<Self> {
        let data = &raw.bytes;
        let indicator = sections::parse_indicator(data)?;
        let identification = sections::parse_identification(data)?;
        let grid_definition = sections::parse_grid_definition(data)?;
        let product_definition =
            sections::parse_product_definition(data, indicator.discipline)?;

        Ok(Self {
            offset: raw.offset,
            raw: raw.bytes,
            indicator,
            identification,
            grid_definition,
            product_definition,
        })
    }

    /// Parse a standalone message starting at offset 0.
    pub fn from_bytes(bytes: Bytes) -> Grib2Result<Self> {
        Self::parse(RawMessage { offset: 0, bytes })
    }

    pub fn parameter(&self) -> &str {
        &self.product_definition.parameter_short_name
    }

    pub fn level(&self) -> &str {
        &self.product_definition.level_description
    }

    pub fn reference_time(&self) -> DateTime<Utc> {
        self.identification.reference_time
    }

    /// Reference time plus forecast offset; `None` when the offset is
    /// missing or lands outside the representable range.
    pub fn valid_time(&self) -> Option<DateTime<Utc>> {
        self.product_definition
            .forecast_offset()
            .and_then(|offset| self.identification.reference_time.checked_add_signed(offset))
    }

    pub fn grid_dims(&self) -> (u32, u32) {
        (self.grid_definition.ni, self.grid_definition.nj)
    }

    /// Geographic extent, when the grid template allows deriving it.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        self.grid_definition.bounding_box()
    }

    /// Unpack the data section into one value per grid point.
    pub fn unpack_data(&self) -> Grib2Result<Vec<Option<f32>>> {
        let repr = sections::parse_data_representation(&self.raw)?;
        if repr.template != 0 {
            return unpacking::unpack_with_codec(&self.raw);
        }

        let bitmap = sections::parse_bitmap(&self.raw)?;
        let data = sections::parse_data_section(&self.raw)?;

        match bitmap {
            Bitmap::Absent => {
                unpacking::unpack_simple(&data.data, repr.num_packed_values, &repr, None)
            }
            Bitmap::Present(bits) => unpacking::unpack_simple(
                &data.data,
                self.grid_definition.num_data_points,
                &repr,
                Some(&bits),
            ),
            Bitmap::Other(_) => unpacking::unpack_with_codec(&self.raw),
        }
    }
}
