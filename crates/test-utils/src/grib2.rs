//! Synthetic GRIB2 messages.
//!
//! Builds complete edition 2 messages with a regular lat/lon grid
//! (template 3.0), an analysis/forecast product (template 4.0) and 16-bit
//! simple packing (template 5.0). NaN data values are written as missing
//! points through a bitmap section.

/// Build a minimal GRIB2 message with the specified parameters.
#[derive(Debug, Clone)]
pub struct Grib2Builder {
    discipline: u8,
    center: u16,
    reference: (u16, u8, u8, u8),
    ni: u32,
    nj: u32,
    /// First/last grid point in degrees
    la1: f64,
    lo1: f64,
    la2: f64,
    lo2: f64,
    scanning_mode: u8,
    category: u8,
    number: u8,
    level_type: u8,
    level_value: u32,
    forecast_hour: u32,
    values: Vec<f32>,
}

impl Default for Grib2Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Grib2Builder {
    /// 10x10 one-degree grid over the US west coast, 2 m temperature.
    pub fn new() -> Self {
        let (ni, nj) = (10, 10);
        Self {
            discipline: 0,
            center: 7,
            reference: (2025, 12, 10, 12),
            ni,
            nj,
            la1: 45.0,
            lo1: 230.0,
            la2: 36.0,
            lo2: 239.0,
            scanning_mode: 0b0100_0000,
            category: 0,
            number: 0,
            level_type: 103,
            level_value: 2,
            forecast_hour: 0,
            values: vec![288.15; (ni * nj) as usize],
        }
    }

    pub fn with_reference_time(mut self, year: u16, month: u8, day: u8, hour: u8) -> Self {
        self.reference = (year, month, day, hour);
        self
    }

    /// Resize the grid; data is reset to zeros.
    pub fn with_grid(mut self, ni: u32, nj: u32) -> Self {
        self.ni = ni;
        self.nj = nj;
        self.values = vec![0.0; (ni * nj) as usize];
        self
    }

    /// Corner points in degrees (longitudes may be 0..360 or -180..180).
    pub fn with_area(mut self, first_lat: f64, first_lon: f64, last_lat: f64, last_lon: f64) -> Self {
        self.la1 = first_lat;
        self.lo1 = first_lon;
        self.la2 = last_lat;
        self.lo2 = last_lon;
        self
    }

    pub fn with_discipline(mut self, discipline: u8) -> Self {
        self.discipline = discipline;
        self
    }

    pub fn with_parameter(mut self, category: u8, number: u8) -> Self {
        self.category = category;
        self.number = number;
        self
    }

    pub fn with_level(mut self, level_type: u8, level_value: u32) -> Self {
        self.level_type = level_type;
        self.level_value = level_value;
        self
    }

    pub fn with_forecast_hour(mut self, hour: u32) -> Self {
        self.forecast_hour = hour;
        self
    }

    pub fn with_constant_value(mut self, value: f32) -> Self {
        self.values = vec![value; (self.ni * self.nj) as usize];
        self
    }

    /// Row-major values; NaN marks a missing point.
    pub fn with_data(mut self, values: Vec<f32>) -> Self {
        self.values = values;
        self
    }

    /// Build the complete GRIB2 message bytes.
    pub fn build(&self) -> Vec<u8> {
        let sections = [
            self.section1(),
            self.section3(),
            self.section4(),
            self.section5(),
            self.section6(),
            self.section7(),
        ];
        let total = 16 + sections.iter().map(Vec::len).sum::<usize>() + 4;

        let mut message = Vec::with_capacity(total);
        message.extend_from_slice(b"GRIB");
        message.extend_from_slice(&[0, 0]);
        message.push(self.discipline);
        message.push(2);
        message.extend_from_slice(&(total as u64).to_be_bytes());
        for section in &sections {
            message.extend_from_slice(section);
        }
        message.extend_from_slice(b"7777");
        message
    }

    fn has_missing(&self) -> bool {
        self.values.iter().any(|v| v.is_nan())
    }

    fn present(&self) -> impl Iterator<Item = f32> + '_ {
        self.values.iter().copied().filter(|v| !v.is_nan())
    }

    /// (reference value, binary scale factor, bits per value)
    fn packing(&self) -> (f32, i16, u8) {
        let (min, max) = self
            .present()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
        if !min.is_finite() || max == min {
            return (if min.is_finite() { min } else { 0.0 }, 0, 0);
        }
        let e = ((max - min) as f64 / 65535.0).log2().ceil() as i16;
        (min, e, 16)
    }

    fn section1(&self) -> Vec<u8> {
        let (year, month, day, hour) = self.reference;
        let mut s = section_header(21, 1);
        s.extend_from_slice(&self.center.to_be_bytes());
        s.extend_from_slice(&0u16.to_be_bytes()); // sub-center
        s.push(2); // master tables version
        s.push(1); // local tables version
        s.push(1); // reference time is start of forecast
        s.extend_from_slice(&year.to_be_bytes());
        s.extend_from_slice(&[month, day, hour, 0, 0]);
        s.push(0); // operational
        s.push(1); // forecast
        s
    }

    fn section3(&self) -> Vec<u8> {
        let mut s = section_header(72, 3);
        s.push(0); // source of grid definition
        s.extend_from_slice(&(self.ni * self.nj).to_be_bytes());
        s.push(0);
        s.push(0);
        s.extend_from_slice(&0u16.to_be_bytes()); // template 3.0

        s.push(6); // spherical earth
        s.push(0);
        s.extend_from_slice(&0u32.to_be_bytes());
        s.push(0);
        s.extend_from_slice(&0u32.to_be_bytes());
        s.push(0);
        s.extend_from_slice(&0u32.to_be_bytes());

        s.extend_from_slice(&self.ni.to_be_bytes());
        s.extend_from_slice(&self.nj.to_be_bytes());
        s.extend_from_slice(&0u32.to_be_bytes()); // basic angle
        s.extend_from_slice(&u32::MAX.to_be_bytes()); // subdivisions

        let di = (self.lo2 - self.lo1).abs() / (self.ni.max(2) - 1) as f64;
        let dj = (self.la1 - self.la2).abs() / (self.nj.max(2) - 1) as f64;

        s.extend_from_slice(&micro(self.la1));
        s.extend_from_slice(&micro(self.lo1));
        s.push(48); // resolution and component flags
        s.extend_from_slice(&micro(self.la2));
        s.extend_from_slice(&micro(self.lo2));
        s.extend_from_slice(&((di * 1e6).round() as u32).to_be_bytes());
        s.extend_from_slice(&((dj * 1e6).round() as u32).to_be_bytes());
        s.push(self.scanning_mode);
        s
    }

    fn section4(&self) -> Vec<u8> {
        let mut s = section_header(34, 4);
        s.extend_from_slice(&0u16.to_be_bytes()); // coordinate values
        s.extend_from_slice(&0u16.to_be_bytes()); // template 4.0
        s.push(self.category);
        s.push(self.number);
        s.push(2); // forecast
        s.push(0);
        s.push(0);
        s.extend_from_slice(&0u16.to_be_bytes());
        s.push(0);
        s.push(1); // hours
        s.extend_from_slice(&self.forecast_hour.to_be_bytes());
        s.push(self.level_type);
        s.push(0);
        s.extend_from_slice(&self.level_value.to_be_bytes());
        s.push(255); // no second surface
        s.push(0);
        s.extend_from_slice(&0u32.to_be_bytes());
        s
    }

    fn section5(&self) -> Vec<u8> {
        let (reference, e, bits) = self.packing();
        let mut s = section_header(21, 5);
        s.extend_from_slice(&(self.present().count() as u32).to_be_bytes());
        s.extend_from_slice(&0u16.to_be_bytes()); // template 5.0
        s.extend_from_slice(&reference.to_be_bytes());
        s.extend_from_slice(&signed16(e));
        s.extend_from_slice(&signed16(0)); // decimal scale factor
        s.push(bits);
        s.push(0); // floating point
        s
    }

    fn section6(&self) -> Vec<u8> {
        if !self.has_missing() {
            let mut s = section_header(6, 6);
            s.push(255);
            return s;
        }

        let mut bitmap = vec![0u8; (self.values.len() + 7) / 8];
        for (i, v) in self.values.iter().enumerate() {
            if !v.is_nan() {
                bitmap[i / 8] |= 0x80 >> (i % 8);
            }
        }
        let mut s = section_header(6 + bitmap.len() as u32, 6);
        s.push(0);
        s.extend_from_slice(&bitmap);
        s
    }

    fn section7(&self) -> Vec<u8> {
        let (reference, e, bits) = self.packing();
        let mut packed = Vec::new();
        if bits > 0 {
            let scale = 2.0_f64.powi(e as i32);
            for v in self.present() {
                let x = ((v - reference) as f64 / scale).round().clamp(0.0, 65535.0) as u16;
                packed.extend_from_slice(&x.to_be_bytes());
            }
        }
        let mut s = section_header(5 + packed.len() as u32, 7);
        s.extend_from_slice(&packed);
        s
    }
}

fn section_header(length: u32, number: u8) -> Vec<u8> {
    let mut s = Vec::with_capacity(length as usize);
    s.extend_from_slice(&length.to_be_bytes());
    s.push(number);
    s
}

/// Degrees to sign-magnitude microdegrees.
fn micro(degrees: f64) -> [u8; 4] {
    let magnitude = (degrees.abs() * 1e6).round() as u32 & 0x7FFF_FFFF;
    let sign = if degrees < 0.0 { 0x8000_0000 } else { 0 };
    (magnitude | sign).to_be_bytes()
}

fn signed16(value: i16) -> [u8; 2] {
    let magnitude = value.unsigned_abs() & 0x7FFF;
    let sign = if value < 0 { 0x8000 } else { 0 };
    (magnitude | sign).to_be_bytes()
}
