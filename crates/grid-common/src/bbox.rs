//! Geographic bounding box used by decode filters.

use serde::{Deserialize, Serialize};

/// A geographic bounding box in degrees: `[west, south, east, north]`.
///
/// Longitudes are expected in the -180..180 range. Boxes crossing the
/// antimeridian are expressed with `west > east`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    /// Create a new bounding box from its edges.
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Self {
        Self {
            west,
            south,
            east,
            north,
        }
    }

    /// The whole globe.
    pub fn global() -> Self {
        Self::new(-180.0, -90.0, 180.0, 90.0)
    }

    /// Parse a `"west,south,east,north"` string.
    pub fn parse(s: &str) -> Result<Self, BboxParseError> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        if parts.len() != 4 {
            return Err(BboxParseError::InvalidFormat(s.to_string()));
        }

        let mut edges = [0.0f64; 4];
        for (edge, part) in edges.iter_mut().zip(&parts) {
            *edge = part
                .parse()
                .map_err(|_| BboxParseError::InvalidNumber(part.to_string()))?;
        }

        let bbox = Self::new(edges[0], edges[1], edges[2], edges[3]);
        if bbox.south > bbox.north {
            return Err(BboxParseError::InvertedLatitudes(s.to_string()));
        }
        Ok(bbox)
    }

    /// As the `[west, south, east, north]` array used in decode metadata.
    pub fn to_array(&self) -> [f64; 4] {
        [self.west, self.south, self.east, self.north]
    }

    /// Whether the box wraps across the antimeridian.
    pub fn crosses_antimeridian(&self) -> bool {
        self.west > self.east
    }

    /// Check if this bbox intersects another (edges touching count as intersecting).
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        if self.south > other.north || self.north < other.south {
            return false;
        }

        match (self.crosses_antimeridian(), other.crosses_antimeridian()) {
            (false, false) => self.west <= other.east && self.east >= other.west,
            // Two wrapping boxes always share the antimeridian.
            (true, true) => true,
            (true, false) => other.east >= self.west || other.west <= self.east,
            (false, true) => self.east >= other.west || self.west <= other.east,
        }
    }

    /// Check if a point is contained within this bbox.
    pub fn contains_point(&self, lon: f64, lat: f64) -> bool {
        if lat < self.south || lat > self.north {
            return false;
        }
        if self.crosses_antimeridian() {
            lon >= self.west || lon <= self.east
        } else {
            lon >= self.west && lon <= self.east
        }
    }
}

/// Normalize a longitude from 0..360 into -180..180.
pub fn normalize_longitude(lon: f64) -> f64 {
    if lon > 180.0 {
        lon - 360.0
    } else if lon < -180.0 {
        lon + 360.0
    } else {
        lon
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BboxParseError {
    #[error("Invalid bbox format: {0}. Expected 'west,south,east,north'")]
    InvalidFormat(String),

    #[error("Invalid number in bbox: {0}")]
    InvalidNumber(String),

    #[error("South edge is north of north edge: {0}")]
    InvertedLatitudes(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bbox() {
        let bbox = BoundingBox::parse("-125.0, 24.0, -66.0, 50.0").unwrap();
        assert_eq!(bbox.west, -125.0);
        assert_eq!(bbox.south, 24.0);
        assert_eq!(bbox.east, -66.0);
        assert_eq!(bbox.north, 50.0);

        assert!(BoundingBox::parse("1,2,3").is_err());
        assert!(BoundingBox::parse("1,2,x,4").is_err());
        assert!(BoundingBox::parse("0,50,10,40").is_err());
    }

    #[test]
    fn test_intersects() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 15.0, 15.0);
        let c = BoundingBox::new(20.0, 20.0, 30.0, 30.0);

        assert!(a.intersects(&b));
        assert!(b.intersects(&a));
        assert!(!a.intersects(&c));
    }

    #[test]
    fn test_intersects_antimeridian() {
        let pacific = BoundingBox::new(170.0, -10.0, -170.0, 10.0);
        let fiji = BoundingBox::new(175.0, -20.0, 179.0, -15.0);
        let samoa = BoundingBox::new(-173.0, -5.0, -171.0, 5.0);
        let africa = BoundingBox::new(10.0, -5.0, 30.0, 5.0);

        assert!(!pacific.intersects(&fiji)); // latitudes disjoint
        assert!(pacific.intersects(&samoa));
        assert!(!pacific.intersects(&africa));
    }

    #[test]
    fn test_normalize_longitude() {
        assert_eq!(normalize_longitude(230.0), -130.0);
        assert_eq!(normalize_longitude(-95.0), -95.0);
        assert_eq!(normalize_longitude(180.0), 180.0);
    }
}
