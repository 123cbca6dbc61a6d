//! GRIB2 section parsing.
//!
//! A GRIB2 message is an indicator (Section 0) followed by length-prefixed
//! sections numbered 1-7 and the `7777` end marker (Section 8). Only the
//! fields needed to filter and decode a message are extracted here.

use bytes::Bytes;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use grid_common::{normalize_longitude, BoundingBox};

use crate::tables::{level_description, parameter_short_name};
use crate::Grib2Error;

/// Length of Section 0.
pub const INDICATOR_LEN: usize = 16;

/// Section 0: Indicator Section (16 bytes)
#[derive(Debug, Clone)]
pub struct Indicator {
    pub discipline: u8,
    pub edition: u8,
    pub message_length: u64,
}

/// Section 1: Identification Section
#[derive(Debug, Clone)]
pub struct Identification {
    pub center: u16,
    pub sub_center: u16,
    pub significance_of_reference_time: u8,
    pub reference_time: DateTime<Utc>,
    pub production_status: u8,
    pub data_type: u8,
}

/// Section 3: Grid Definition Section
#[derive(Debug, Clone)]
pub struct GridDefinition {
    pub template: u16,
    pub num_data_points: u32,
    pub ni: u32,
    pub nj: u32,
    /// Corner coordinates in degrees, only known for lat/lon grids (template 3.0).
    pub first_lat: Option<f64>,
    pub first_lon: Option<f64>,
    pub last_lat: Option<f64>,
    pub last_lon: Option<f64>,
    pub lon_increment: Option<f64>,
    pub scanning_mode: u8,
}

impl GridDefinition {
    /// Geographic extent of the grid, when it can be derived from the template.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        let (la1, la2) = (self.first_lat?, self.last_lat?);
        let (mut lo1, mut lo2) = (self.first_lon?, self.last_lon?);

        // Scanning mode bit 1 set: points scan in the -i direction
        if self.scanning_mode & 0x80 != 0 {
            std::mem::swap(&mut lo1, &mut lo2);
        }

        let south = la1.min(la2);
        let north = la1.max(la2);

        let span = (lo2 - lo1).rem_euclid(360.0) + self.lon_increment.unwrap_or(0.0);
        if span >= 359.999 {
            return Some(BoundingBox::new(-180.0, south, 180.0, north));
        }

        Some(BoundingBox::new(
            normalize_longitude(lo1),
            south,
            normalize_longitude(lo2),
            north,
        ))
    }
}

/// Section 4: Product Definition Section
#[derive(Debug, Clone)]
pub struct ProductDefinition {
    pub template: u16,
    pub parameter_category: u8,
    pub parameter_number: u8,
    pub parameter_short_name: String,
    /// Code table 4.4 unit of the forecast time.
    pub time_unit: u8,
    /// `None` when encoded as all ones (missing).
    pub forecast_time: Option<u32>,
    pub level_type: u8,
    pub level_value: u32,
    pub level_description: String,
}

impl ProductDefinition {
    /// Offset of the valid time from the reference time, when known.
    pub fn forecast_offset(&self) -> Option<Duration> {
        let unit_seconds: i64 = match self.time_unit {
            0 => 60,
            1 => 3600,
            2 => 86_400,
            10 => 3 * 3600,
            11 => 6 * 3600,
            12 => 12 * 3600,
            13 => 1,
            // Unknown units: treat as hours, the overwhelmingly common case
            _ => 3600,
        };
        // u32 * 86_400 cannot overflow i64
        self.forecast_time
            .map(|t| Duration::seconds(t as i64 * unit_seconds))
    }

    /// Forecast lead time in whole hours.
    pub fn forecast_hour(&self) -> Option<u32> {
        self.forecast_offset()
            .map(|offset| offset.num_hours().clamp(0, u32::MAX as i64) as u32)
    }
}

/// Section 5: Data Representation Section
#[derive(Debug, Clone)]
pub struct DataRepresentation {
    /// Number of packed values (excludes points masked by the bitmap).
    pub num_packed_values: u32,
    pub template: u16,
    pub reference_value: f32,
    pub binary_scale_factor: i16,
    pub decimal_scale_factor: i16,
    pub bits_per_value: u8,
}

/// Section 6: Bitmap Section
#[derive(Debug, Clone)]
pub enum Bitmap {
    /// Indicator 255: every grid point has a value.
    Absent,
    /// Indicator 0: one bit per grid point follows.
    Present(Bytes),
    /// Indicators 1-254: predefined or previously defined bitmap.
    Other(u8),
}

/// Section 7: Data Section
#[derive(Debug, Clone)]
pub struct DataSection {
    pub data: Bytes,
}

/// Decode a GRIB2 sign-magnitude integer (MSB is the sign bit).
///
/// Slices other than 4 bytes decode to 0.
pub fn decode_grib2_signed(bytes: &[u8]) -> i32 {
    if bytes.len() != 4 {
        return 0;
    }
    let raw = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let magnitude = (raw & 0x7FFF_FFFF) as i32;
    if raw & 0x8000_0000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Sign-magnitude 16-bit integer (used for scale factors).
fn decode_grib2_signed_i16(hi: u8, lo: u8) -> i16 {
    let raw = u16::from_be_bytes([hi, lo]);
    let magnitude = (raw & 0x7FFF) as i16;
    if raw & 0x8000 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

fn be_u32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

// ===== Parsing Functions =====

/// Parse Section 0 (Indicator) from start of message
pub fn parse_indicator(data: &[u8]) -> Result<Indicator, Grib2Error> {
    if data.len() < INDICATOR_LEN {
        return Err(Grib2Error::InvalidFormat(
            "Not enough data for indicator section".to_string(),
        ));
    }

    if &data[0..4] != b"GRIB" {
        return Err(Grib2Error::InvalidFormat(
            "Invalid GRIB magic bytes".to_string(),
        ));
    }

    // Octets 5-6 reserved, 7 discipline, 8 edition, 9-16 total length
    let discipline = data[6];
    let edition = data[7];
    if edition != 2 {
        return Err(Grib2Error::InvalidFormat(format!(
            "Expected GRIB edition 2, got {}",
            edition
        )));
    }

    let message_length = u64::from_be_bytes([
        data[8], data[9], data[10], data[11], data[12], data[13], data[14], data[15],
    ]);

    Ok(Indicator {
        discipline,
        edition,
        message_length,
    })
}

/// Parse Section 1 (Identification), located right after Section 0.
pub fn parse_identification(data: &[u8]) -> Result<Identification, Grib2Error> {
    let offset = find_section(data, 1)?;
    let sec = &data[offset..];

    if sec.len() < 21 {
        return Err(Grib2Error::InvalidSection {
            section: 1,
            reason: "Not enough data".to_string(),
        });
    }

    let center = u16::from_be_bytes([sec[5], sec[6]]);
    let sub_center = u16::from_be_bytes([sec[7], sec[8]]);
    let significance_of_reference_time = sec[11];

    let year = u16::from_be_bytes([sec[12], sec[13]]);
    let (month, day, hour, minute, second) = (sec[14], sec[15], sec[16], sec[17], sec[18]);

    let reference_time = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second as u32))
        .ok_or_else(|| Grib2Error::InvalidSection {
            section: 1,
            reason: format!(
                "Invalid date: {}-{:02}-{:02} {:02}:{:02}:{:02}",
                year, month, day, hour, minute, second
            ),
        })?;

    Ok(Identification {
        center,
        sub_center,
        significance_of_reference_time,
        reference_time: DateTime::<Utc>::from_naive_utc_and_offset(reference_time, Utc),
        production_status: sec[19],
        data_type: sec[20],
    })
}

/// Parse Section 3 (Grid Definition)
pub fn parse_grid_definition(data: &[u8]) -> Result<GridDefinition, Grib2Error> {
    let offset = find_section(data, 3)?;
    let sec = &data[offset..];

    if sec.len() < 14 {
        return Err(Grib2Error::InvalidSection {
            section: 3,
            reason: "Not enough data".to_string(),
        });
    }

    // 0-3 length, 4 number, 5 source, 6-9 number of points,
    // 10-11 optional list, 12-13 template number, 14.. template
    let num_data_points = be_u32(sec, 6);
    let template = u16::from_be_bytes([sec[12], sec[13]]);
    let gd = &sec[14..];

    let mut grid = GridDefinition {
        template,
        num_data_points,
        ni: 0,
        nj: 0,
        first_lat: None,
        first_lon: None,
        last_lat: None,
        last_lon: None,
        lon_increment: None,
        scanning_mode: 0,
    };

    if gd.len() >= 24 {
        grid.ni = be_u32(gd, 16);
        grid.nj = be_u32(gd, 20);
    }

    if template == 0 {
        // Template 3.0: regular latitude/longitude
        if gd.len() < 58 {
            return Err(Grib2Error::InvalidSection {
                section: 3,
                reason: format!("Template 0 needs at least 58 bytes, got {}", gd.len()),
            });
        }

        // Angles are in units of basic_angle / subdivisions; 0 / missing means 1e-6 degree
        let basic_angle = be_u32(gd, 24);
        let subdivisions = be_u32(gd, 28);
        let unit = if basic_angle == 0 || subdivisions == 0 || subdivisions == u32::MAX {
            1e-6
        } else {
            basic_angle as f64 / subdivisions as f64
        };

        grid.first_lat = Some(decode_grib2_signed(&gd[32..36]) as f64 * unit);
        grid.first_lon = Some(decode_grib2_signed(&gd[36..40]) as f64 * unit);
        grid.last_lat = Some(decode_grib2_signed(&gd[41..45]) as f64 * unit);
        grid.last_lon = Some(decode_grib2_signed(&gd[45..49]) as f64 * unit);
        grid.lon_increment = Some(be_u32(gd, 49) as f64 * unit);
        grid.scanning_mode = gd[57];
    }

    Ok(grid)
}

/// Parse Section 4 (Product Definition)
pub fn parse_product_definition(
    data: &[u8],
    discipline: u8,
) -> Result<ProductDefinition, Grib2Error> {
    let offset = find_section(data, 4)?;
    let sec = &data[offset..];

    if sec.len() < 11 {
        return Err(Grib2Error::InvalidSection {
            section: 4,
            reason: "Not enough data".to_string(),
        });
    }

    // 5-6 coordinate values, 7-8 template, 9 category, 10 number
    let template = u16::from_be_bytes([sec[7], sec[8]]);
    let parameter_category = sec[9];
    let parameter_number = sec[10];

    // Templates 4.0-4.15 share the layout up to the first fixed surface
    let time_unit = sec.get(17).copied().unwrap_or(1);
    let forecast_time = if sec.len() >= 22 {
        Some(be_u32(sec, 18)).filter(|&t| t != u32::MAX)
    } else {
        Some(0)
    };
    let level_type = sec.get(22).copied().unwrap_or(1);
    let level_value = if sec.len() >= 28 { be_u32(sec, 24) } else { 0 };

    Ok(ProductDefinition {
        template,
        parameter_category,
        parameter_number,
        parameter_short_name: parameter_short_name(discipline, parameter_category, parameter_number),
        time_unit,
        forecast_time,
        level_type,
        level_value,
        level_description: level_description(level_type, level_value),
    })
}

/// Parse Section 5 (Data Representation)
pub fn parse_data_representation(data: &[u8]) -> Result<DataRepresentation, Grib2Error> {
    let offset = find_section(data, 5)?;
    let sec = &data[offset..];

    if sec.len() < 11 {
        return Err(Grib2Error::InvalidSection {
            section: 5,
            reason: "Not enough data".to_string(),
        });
    }

    // 5-8 number of values, 9-10 template; simple-packing fields follow at 11
    let num_packed_values = be_u32(sec, 5);
    let template = u16::from_be_bytes([sec[9], sec[10]]);
    let t = &sec[11..];

    let reference_value = if t.len() >= 4 {
        f32::from_be_bytes([t[0], t[1], t[2], t[3]])
    } else {
        0.0
    };
    let binary_scale_factor = if t.len() >= 6 {
        decode_grib2_signed_i16(t[4], t[5])
    } else {
        0
    };
    let decimal_scale_factor = if t.len() >= 8 {
        decode_grib2_signed_i16(t[6], t[7])
    } else {
        0
    };

    Ok(DataRepresentation {
        num_packed_values,
        template,
        reference_value,
        binary_scale_factor,
        decimal_scale_factor,
        bits_per_value: t.get(8).copied().unwrap_or(0),
    })
}

/// Parse Section 6 (Bitmap)
pub fn parse_bitmap(data: &Bytes) -> Result<Bitmap, Grib2Error> {
    let offset = find_section(data, 6)?;
    let sec = &data[offset..];

    if sec.len() < 6 {
        return Err(Grib2Error::InvalidSection {
            section: 6,
            reason: "Not enough data".to_string(),
        });
    }

    let section_length = be_u32(sec, 0) as usize;
    match sec[5] {
        255 => Ok(Bitmap::Absent),
        0 => Ok(Bitmap::Present(
            data.slice(offset + 6..offset + section_length.max(6)),
        )),
        other => Ok(Bitmap::Other(other)),
    }
}

/// Parse Section 7 (Data)
pub fn parse_data_section(data: &Bytes) -> Result<DataSection, Grib2Error> {
    let offset = find_section(data, 7)?;
    let section_length = be_u32(data, offset) as usize;

    Ok(DataSection {
        data: data.slice(offset + 5..offset + section_length),
    })
}

// ===== Helper Functions =====

/// Find a section by number within a message, returning its byte offset.
fn find_section(data: &[u8], section_num: u8) -> Result<usize, Grib2Error> {
    let mut offset = INDICATOR_LEN;

    loop {
        if offset + 5 > data.len() {
            return Err(Grib2Error::InvalidSection {
                section: section_num,
                reason: "Section not found".to_string(),
            });
        }

        // End marker
        if &data[offset..offset + 4] == b"7777" {
            return Err(Grib2Error::InvalidSection {
                section: section_num,
                reason: "Reached end of message without finding section".to_string(),
            });
        }

        let section_length = be_u32(data, offset) as usize;
        if section_length < 5 || offset + section_length > data.len() {
            return Err(Grib2Error::InvalidSection {
                section: section_num,
                reason: "Invalid section length".to_string(),
            });
        }

        if data[offset + 4] == section_num {
            return Ok(offset);
        }

        offset += section_length;
    }
}
