//! GRIB2 data unpacking.
//!
//! Simple packing (template 5.0) is decoded natively. Complex, JPEG2000 and
//! PNG packings are handed to the `grib` crate.

use std::io::Cursor;

use crate::sections::DataRepresentation;
use crate::Grib2Error;

/// Upper bound on grid points decoded from one message.
pub const MAX_GRID_POINTS: u32 = 1 << 28;

/// Unpack simple packed GRIB2 data.
///
/// `value = (R + X * 2^E) * 10^-D`. With a bitmap, only points whose bit is
/// set consume a packed value; the rest are `None`. The point count is
/// checked against the bitmap and the packed bytes before anything is
/// allocated.
pub fn unpack_simple(
    packed_data: &[u8],
    num_points: u32,
    repr: &DataRepresentation,
    bitmap: Option<&[u8]>,
) -> Result<Vec<Option<f32>>, Grib2Error> {
    if num_points > MAX_GRID_POINTS {
        return Err(Grib2Error::UnpackingError(format!(
            "{} grid points exceeds the limit of {}",
            num_points, MAX_GRID_POINTS
        )));
    }
    if repr.bits_per_value > 32 {
        return Err(Grib2Error::UnpackingError(format!(
            "Invalid number of bits: {}",
            repr.bits_per_value
        )));
    }

    let num_points = num_points as usize;
    let packed_count = match bitmap {
        Some(bm) => {
            if bm.len() * 8 < num_points {
                return Err(Grib2Error::UnpackingError(format!(
                    "Bitmap covers {} points, grid has {}",
                    bm.len() * 8,
                    num_points
                )));
            }
            count_set_bits(bm, num_points)
        }
        None => num_points,
    };

    let needed_bits = packed_count as u64 * repr.bits_per_value as u64;
    let available_bits = packed_data.len() as u64 * 8;
    if needed_bits > available_bits {
        return Err(Grib2Error::UnpackingError(format!(
            "{} values of {} bits need {} bits, data section holds {}",
            packed_count, repr.bits_per_value, needed_bits, available_bits
        )));
    }

    let binary_scale = 2.0_f64.powi(repr.binary_scale_factor as i32);
    let decimal_scale = 10.0_f64.powi(-(repr.decimal_scale_factor as i32));
    let reference = repr.reference_value as f64;
    let bits_per_value = repr.bits_per_value as usize;

    let mut values = Vec::with_capacity(num_points);
    let mut bit_position = 0usize;

    for i in 0..num_points {
        if let Some(bm) = bitmap {
            let present = bm
                .get(i / 8)
                .map(|byte| (byte >> (7 - (i % 8))) & 1 == 1)
                .unwrap_or(false);
            if !present {
                values.push(None);
                continue;
            }
        }

        let packed = if bits_per_value == 0 {
            // Constant field
            0
        } else {
            let packed = extract_bits(packed_data, bit_position, bits_per_value)?;
            bit_position += bits_per_value;
            packed
        };

        let value = (reference + packed as f64 * binary_scale) * decimal_scale;
        values.push(Some(value as f32));
    }

    Ok(values)
}

/// Decode any packing the `grib` crate understands from a complete message.
///
/// Missing values come back as NaN from the codec and are mapped to `None`.
pub fn unpack_with_codec(message: &[u8]) -> Result<Vec<Option<f32>>, Grib2Error> {
    let grib_file = grib::from_reader(Cursor::new(message))
        .map_err(|e| Grib2Error::UnpackingError(format!("grib codec: {}", e)))?;

    let (_, submessage) = grib_file
        .iter()
        .next()
        .ok_or_else(|| Grib2Error::UnpackingError("Message has no submessage".to_string()))?;

    let decoder = grib::Grib2SubmessageDecoder::from(submessage)
        .map_err(|e| Grib2Error::UnpackingError(format!("grib decoder: {}", e)))?;
    let values = decoder
        .dispatch()
        .map_err(|e| Grib2Error::UnpackingError(format!("grib dispatch: {}", e)))?;

    let decoded: Vec<Option<f32>> = values
        .map(|v| if v.is_nan() { None } else { Some(v) })
        .collect();
    Ok(decoded)
}

/// Set bits among the first `num_points` bits of `bitmap`.
fn count_set_bits(bitmap: &[u8], num_points: usize) -> usize {
    let full = num_points / 8;
    let whole: usize = bitmap[..full].iter().map(|b| b.count_ones() as usize).sum();
    let rest = num_points % 8;
    if rest == 0 {
        whole
    } else {
        let mask = 0xFFu8 << (8 - rest);
        whole + (bitmap[full] & mask).count_ones() as usize
    }
}

/// Extract `num_bits` bits, MSB first, starting at `start_bit`.
fn extract_bits(data: &[u8], start_bit: usize, num_bits: usize) -> Result<u32, Grib2Error> {
    if num_bits > 32 || num_bits == 0 {
        return Err(Grib2Error::UnpackingError(format!(
            "Invalid number of bits: {}",
            num_bits
        )));
    }
    if (start_bit + num_bits + 7) / 8 > data.len() {
        return Err(Grib2Error::UnpackingError(
            "Not enough data to extract bits".to_string(),
        ));
    }

    let mut result = 0u32;
    for i in 0..num_bits {
        let absolute_bit = start_bit + i;
        let bit = (data[absolute_bit / 8] >> (7 - (absolute_bit % 8))) & 1;
        result = (result << 1) | bit as u32;
    }

    Ok(result)
}
