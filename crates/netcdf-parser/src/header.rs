//! NetCDF classic and 64-bit offset header parsing.
//!
//! Layout (all integers big-endian):
//!
//! ```text
//! header   = magic numrecs dim_list gatt_list var_list
//! magic    = 'C' 'D' 'F' (1 | 2)
//! dim_list = ABSENT | NC_DIMENSION nelems [name dim_length ...]
//! att_list = ABSENT | NC_ATTRIBUTE nelems [name nc_type nelems values ...]
//! var_list = ABSENT | NC_VARIABLE nelems [name ndims dimids att_list nc_type vsize begin ...]
//! ```
//!
//! Names and attribute values are padded to 4-byte boundaries. `begin` is
//! 32 bits wide in CDF-1 and 64 bits wide in CDF-2.

use nom::bytes::streaming::take;
use nom::error::{Error as NomError, ErrorKind};
use nom::multi::count;
use nom::number::streaming::{be_u32, be_u64};
use nom::IResult;

use crate::error::{NetCdfError, NetCdfResult};

type Input<'a> = &'a [u8];

const ABSENT: u32 = 0x00;
const NC_DIMENSION: u32 = 0x0A;
const NC_VARIABLE: u32 = 0x0B;
const NC_ATTRIBUTE: u32 = 0x0C;
const STREAMING: u32 = 0xFFFF_FFFF;

/// On-disk format flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    /// CDF-1
    Classic,
    /// CDF-2
    Offset64,
}

/// External data types of the classic model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NcType {
    Byte,
    Char,
    Short,
    Int,
    Float,
    Double,
}

impl NcType {
    fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(NcType::Byte),
            2 => Some(NcType::Char),
            3 => Some(NcType::Short),
            4 => Some(NcType::Int),
            5 => Some(NcType::Float),
            6 => Some(NcType::Double),
            _ => None,
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            NcType::Byte => 1,
            NcType::Char => 2,
            NcType::Short => 3,
            NcType::Int => 4,
            NcType::Float => 5,
            NcType::Double => 6,
        }
    }

    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            NcType::Byte | NcType::Char => 1,
            NcType::Short => 2,
            NcType::Int | NcType::Float => 4,
            NcType::Double => 8,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NcType::Byte => "byte",
            NcType::Char => "char",
            NcType::Short => "short",
            NcType::Int => "int",
            NcType::Float => "float",
            NcType::Double => "double",
        }
    }

    /// Decode one big-endian element. `bytes` must be exactly `size()` long.
    pub fn decode(&self, bytes: &[u8]) -> f64 {
        match self {
            NcType::Byte => bytes[0] as i8 as f64,
            NcType::Char => bytes[0] as f64,
            NcType::Short => i16::from_be_bytes([bytes[0], bytes[1]]) as f64,
            NcType::Int => i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            NcType::Float => f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64,
            NcType::Double => f64::from_be_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
            ]),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Dimension {
    pub name: String,
    /// Declared length; 0 for the unlimited (record) dimension.
    pub length: u64,
}

impl Dimension {
    pub fn is_unlimited(&self) -> bool {
        self.length == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Text(String),
    Numbers(Vec<f64>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    pub name: String,
    pub nc_type: NcType,
    pub value: AttributeValue,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub name: String,
    pub dim_ids: Vec<usize>,
    pub attributes: Vec<Attribute>,
    pub nc_type: NcType,
    pub vsize: u64,
    pub begin: u64,
}

impl Variable {
    pub fn attribute(&self, name: &str) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// `_FillValue`, falling back to `missing_value`.
    pub fn fill_value(&self) -> Option<f64> {
        ["_FillValue", "missing_value"]
            .iter()
            .filter_map(|name| self.attribute(name))
            .find_map(|attr| match &attr.value {
                AttributeValue::Numbers(values) => values.first().copied(),
                AttributeValue::Text(_) => None,
            })
    }
}

/// Where a variable's bytes live: `count` runs of `len` bytes, the first at
/// `start` and each following one `stride` bytes further on.
///
/// Fixed-size variables are a single run; record variables have one run per
/// record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Extent {
    pub start: u64,
    pub len: u64,
    pub stride: u64,
    pub count: u64,
}

impl Extent {
    /// Start of run `index`.
    pub fn run_start(&self, index: u64) -> u64 {
        self.start + index * self.stride
    }

    /// Total bytes held, across all runs.
    pub fn total_bytes(&self) -> u64 {
        self.len * self.count
    }

    /// One past the last byte of the last run.
    pub fn end(&self) -> u64 {
        if self.count == 0 {
            self.start
        } else {
            self.run_start(self.count - 1) + self.len
        }
    }

    /// Indices of the runs intersecting `[start, end)`.
    pub fn runs_within(&self, start: u64, end: u64) -> std::ops::Range<u64> {
        if self.len == 0 || self.count == 0 || end <= self.start {
            return 0..0;
        }
        if self.stride == 0 || self.count == 1 {
            let hit = self.start < end && self.start + self.len > start;
            return 0..u64::from(hit);
        }

        // First run whose end lies past `start`
        let first = if start < self.start + self.len {
            0
        } else {
            (start - self.start - self.len) / self.stride + 1
        };
        // Runs beginning before `end`
        let last = ((end - self.start) + self.stride - 1) / self.stride;
        first.min(self.count)..last.min(self.count)
    }

    /// Checked construction; `None` if any byte offset would overflow.
    fn checked(start: u64, len: u64, stride: u64, count: u64) -> Option<Self> {
        let extent = Self {
            start,
            len,
            stride,
            count,
        };
        len.checked_mul(count)?;
        if count > 0 {
            stride
                .checked_mul(count - 1)?
                .checked_add(start)?
                .checked_add(len)?;
        }
        Some(extent)
    }
}

#[derive(Debug, Clone)]
pub struct NetCdfHeader {
    pub version: FormatVersion,
    pub num_records: u64,
    pub dimensions: Vec<Dimension>,
    pub attributes: Vec<Attribute>,
    pub variables: Vec<Variable>,
    /// Bytes occupied by the header itself.
    pub header_size: usize,
    /// Stride between consecutive records.
    pub record_size: u64,
}

impl NetCdfHeader {
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn is_record_variable(&self, var: &Variable) -> bool {
        var.dim_ids
            .first()
            .and_then(|&id| self.dimensions.get(id))
            .map(Dimension::is_unlimited)
            .unwrap_or(false)
    }

    pub fn dimension_names(&self, var: &Variable) -> Vec<String> {
        var.dim_ids
            .iter()
            .filter_map(|&id| self.dimensions.get(id))
            .map(|d| d.name.clone())
            .collect()
    }

    /// Dimension lengths, with the record dimension resolved to `num_records`.
    pub fn shape(&self, var: &Variable) -> Vec<u64> {
        var.dim_ids
            .iter()
            .filter_map(|&id| self.dimensions.get(id))
            .map(|d| if d.is_unlimited() { self.num_records } else { d.length })
            .collect()
    }

    /// Bytes of one record (or of the whole variable when not a record
    /// variable); `None` on overflow.
    fn slab_bytes(&self, var: &Variable) -> Option<u64> {
        let shape = self.shape(var);
        let dims = if self.is_record_variable(var) {
            &shape[1..]
        } else {
            &shape[..]
        };
        dims.iter()
            .try_fold(var.nc_type.size() as u64, |acc, &d| acc.checked_mul(d))
    }

    fn checked_extent(&self, var: &Variable) -> Option<Extent> {
        let len = self.slab_bytes(var)?;
        if self.is_record_variable(var) {
            Extent::checked(var.begin, len, self.record_size, self.num_records)
        } else {
            Extent::checked(var.begin, len, 0, 1)
        }
    }

    /// File byte layout of a variable's values.
    ///
    /// Headers returned by [`parse_header`] are checked so that every
    /// variable's extent fits in a `u64`.
    pub fn extent(&self, var: &Variable) -> Extent {
        self.checked_extent(var).unwrap_or_default()
    }

    /// Total number of values a variable holds.
    pub fn value_count(&self, var: &Variable) -> u64 {
        self.extent(var).total_bytes() / var.nc_type.size() as u64
    }
}

/// Parse a header from the leading bytes of a file.
///
/// `file_len` is the size of the whole file, used to resolve the record count
/// of files written in streaming mode. Returns [`NetCdfError::Incomplete`]
/// when `bytes` ends before the header does.
pub fn parse_header(bytes: &[u8], file_len: u64) -> NetCdfResult<NetCdfHeader> {
    if bytes.starts_with(b"\x89HDF") {
        return Err(NetCdfError::Unsupported(
            "NetCDF-4 (HDF5) files are not supported".to_string(),
        ));
    }
    if bytes.len() < 4 {
        return Err(NetCdfError::Incomplete {
            available: bytes.len(),
        });
    }
    if &bytes[..3] != b"CDF" {
        return Err(NetCdfError::invalid("missing CDF magic"));
    }
    let version = match bytes[3] {
        1 => FormatVersion::Classic,
        2 => FormatVersion::Offset64,
        5 => {
            return Err(NetCdfError::Unsupported(
                "CDF-5 (64-bit data) files are not supported".to_string(),
            ))
        }
        other => return Err(NetCdfError::invalid(format!("unknown version byte {}", other))),
    };

    let body = &bytes[4..];
    let (rest, (numrecs, dimensions, attributes, variables)) =
        header_body(body, version).map_err(|e| match e {
            nom::Err::Incomplete(_) => NetCdfError::Incomplete {
                available: bytes.len(),
            },
            nom::Err::Error(e) | nom::Err::Failure(e) => NetCdfError::invalid(format!(
                "malformed header at byte {} ({:?})",
                bytes.len() - e.input.len(),
                e.code
            )),
        })?;

    for var in &variables {
        if let Some(&bad) = var.dim_ids.iter().find(|&&id| id >= dimensions.len()) {
            return Err(NetCdfError::invalid(format!(
                "variable '{}' references unknown dimension {}",
                var.name, bad
            )));
        }
    }

    let mut header = NetCdfHeader {
        version,
        num_records: 0,
        dimensions,
        attributes,
        variables,
        header_size: bytes.len() - rest.len(),
        record_size: 0,
    };

    let record_vars: Vec<&Variable> = header
        .variables
        .iter()
        .filter(|v| header.is_record_variable(v))
        .collect();
    // A lone record variable is stored without padding
    header.record_size = match record_vars.as_slice() {
        [] => 0,
        [only] => header.slab_bytes(only).ok_or_else(|| overflow(&only.name))?,
        many => many
            .iter()
            .try_fold(0u64, |acc, v| acc.checked_add(v.vsize))
            .ok_or_else(|| NetCdfError::invalid("record size overflows"))?,
    };

    header.num_records = match numrecs {
        Some(n) => n as u64,
        None => {
            let first_begin = record_vars.iter().map(|v| v.begin).min().unwrap_or(file_len);
            if header.record_size == 0 {
                0
            } else {
                file_len.saturating_sub(first_begin) / header.record_size
            }
        }
    };

    if let Some(var) = header
        .variables
        .iter()
        .find(|v| header.checked_extent(v).is_none())
    {
        return Err(overflow(&var.name));
    }

    Ok(header)
}

fn overflow(name: &str) -> NetCdfError {
    NetCdfError::invalid(format!("variable '{}' extends past the 64-bit offset range", name))
}

type HeaderParts = (Option<u32>, Vec<Dimension>, Vec<Attribute>, Vec<Variable>);

fn header_body(input: Input, version: FormatVersion) -> IResult<Input, HeaderParts> {
    let (input, numrecs) = be_u32(input)?;
    let numrecs = (numrecs != STREAMING).then_some(numrecs);

    let (input, ndims) = list_len(input, NC_DIMENSION)?;
    let (input, dimensions) = count(dimension, ndims)(input)?;
    let (input, attributes) = attribute_list(input)?;
    let (input, nvars) = list_len(input, NC_VARIABLE)?;
    let (input, variables) = count(|i| variable(i, version), nvars)(input)?;

    Ok((input, (numrecs, dimensions, attributes, variables)))
}

fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

fn failure(input: Input, kind: ErrorKind) -> nom::Err<NomError<Input>> {
    nom::Err::Failure(NomError::new(input, kind))
}

/// List prefix: `ABSENT` (two zero words) or `tag nelems`.
fn list_len(input: Input, expected: u32) -> IResult<Input, usize> {
    let (rest, tag_value) = be_u32(input)?;
    let (rest, nelems) = be_u32(rest)?;
    if tag_value == ABSENT && nelems == 0 {
        return Ok((rest, 0));
    }
    if tag_value != expected {
        return Err(failure(input, ErrorKind::Tag));
    }
    Ok((rest, nelems as usize))
}

fn name(input: Input) -> IResult<Input, String> {
    let (input, len) = be_u32(input)?;
    let len = len as usize;
    let (input, raw) = take(len)(input)?;
    let (input, _) = take(padding(len))(input)?;
    Ok((input, String::from_utf8_lossy(raw).into_owned()))
}

fn nc_type(input: Input) -> IResult<Input, NcType> {
    let (rest, code) = be_u32(input)?;
    match NcType::from_code(code) {
        Some(t) => Ok((rest, t)),
        None => Err(failure(input, ErrorKind::Verify)),
    }
}

fn dimension(input: Input) -> IResult<Input, Dimension> {
    let (input, name) = name(input)?;
    let (input, length) = be_u32(input)?;
    Ok((
        input,
        Dimension {
            name,
            length: length as u64,
        },
    ))
}

fn attribute(input: Input) -> IResult<Input, Attribute> {
    let (input, name) = name(input)?;
    let (input, nc_type) = nc_type(input)?;
    let (input, nelems) = be_u32(input)?;
    let byte_len = nelems as usize * nc_type.size();
    let (input, raw) = take(byte_len)(input)?;
    let (input, _) = take(padding(byte_len))(input)?;

    let value = match nc_type {
        NcType::Char => AttributeValue::Text(
            String::from_utf8_lossy(raw)
                .trim_end_matches('\0')
                .to_string(),
        ),
        _ => AttributeValue::Numbers(
            raw.chunks_exact(nc_type.size())
                .map(|b| nc_type.decode(b))
                .collect(),
        ),
    };

    Ok((
        input,
        Attribute {
            name,
            nc_type,
            value,
        },
    ))
}

fn attribute_list(input: Input) -> IResult<Input, Vec<Attribute>> {
    let (input, natts) = list_len(input, NC_ATTRIBUTE)?;
    count(attribute, natts)(input)
}

fn variable(input: Input, version: FormatVersion) -> IResult<Input, Variable> {
    let (input, name) = name(input)?;
    let (input, ndims) = be_u32(input)?;
    let (input, dim_ids) = count(be_u32, ndims as usize)(input)?;
    let (input, attributes) = attribute_list(input)?;
    let (input, nc_type) = nc_type(input)?;
    let (input, vsize) = be_u32(input)?;
    let (input, begin) = match version {
        FormatVersion::Classic => {
            let (input, begin) = be_u32(input)?;
            (input, begin as u64)
        }
        FormatVersion::Offset64 => be_u64(input)?,
    };

    Ok((
        input,
        Variable {
            name,
            dim_ids: dim_ids.into_iter().map(|id| id as usize).collect(),
            attributes,
            nc_type,
            vsize: vsize as u64,
            begin,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_padding() {
        assert_eq!(padding(0), 0);
        assert_eq!(padding(1), 3);
        assert_eq!(padding(4), 0);
        assert_eq!(padding(11), 1);
    }

    #[test]
    fn test_rejects_hdf5_and_cdf5() {
        assert!(matches!(
            parse_header(b"\x89HDF\r\n\x1a\n", 8),
            Err(NetCdfError::Unsupported(_))
        ));
        assert!(matches!(
            parse_header(b"CDF\x05\x00\x00\x00\x00", 8),
            Err(NetCdfError::Unsupported(_))
        ));
        assert!(matches!(
            parse_header(b"PK\x03\x04", 4),
            Err(NetCdfError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_empty_header() {
        // magic, numrecs, three ABSENT lists
        let mut bytes = b"CDF\x01".to_vec();
        bytes.extend_from_slice(&[0u8; 4 + 8 * 3]);
        let header = parse_header(&bytes, bytes.len() as u64).unwrap();
        assert!(header.dimensions.is_empty());
        assert!(header.variables.is_empty());
        assert_eq!(header.header_size, bytes.len());
    }

    #[test]
    fn test_truncated_header_is_incomplete() {
        let bytes = b"CDF\x01\x00\x00\x00\x00\x00\x00\x00\x0A";
        assert!(matches!(
            parse_header(bytes, 1000),
            Err(NetCdfError::Incomplete { .. })
        ));
    }

    #[test]
    fn test_extent_runs_within() {
        // Three 8-byte records, 20 bytes apart, starting at 100
        let extent = Extent::checked(100, 8, 20, 3).unwrap();
        assert_eq!(extent.end(), 148);
        assert_eq!(extent.runs_within(0, 100), 0..0);
        assert_eq!(extent.runs_within(0, 101), 0..1);
        assert_eq!(extent.runs_within(108, 120), 1..1);
        assert_eq!(extent.runs_within(107, 121), 0..2);
        assert_eq!(extent.runs_within(130, 1000), 2..3);
        assert_eq!(extent.runs_within(127, 1000), 1..3);
        assert_eq!(extent.runs_within(148, 1000), 3..3);

        let fixed = Extent::checked(40, 12, 0, 1).unwrap();
        assert_eq!(fixed.runs_within(51, 60), 0..1);
        assert_eq!(fixed.runs_within(52, 60), 0..0);
    }

    #[test]
    fn test_extent_overflow() {
        assert!(Extent::checked(u64::MAX - 4, 8, 0, 1).is_none());
        assert!(Extent::checked(0, 8, u64::MAX / 2, 3).is_none());
        assert!(Extent::checked(0, u64::MAX, 1, 2).is_none());
    }

    #[test]
    fn test_decode_types() {
        assert_eq!(NcType::Byte.decode(&[0xFF]), -1.0);
        assert_eq!(NcType::Short.decode(&[0x01, 0x00]), 256.0);
        assert_eq!(NcType::Float.decode(&1.5f32.to_be_bytes()), 1.5);
        assert_eq!(NcType::Double.decode(&(-2.25f64).to_be_bytes()), -2.25);
    }
}
