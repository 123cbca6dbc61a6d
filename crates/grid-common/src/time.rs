//! Time handling for decode filters.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// An inclusive time range used to filter messages by valid time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Parse `"start/end"` where both sides are ISO 8601.
    pub fn parse(s: &str) -> Result<Self, TimeParseError> {
        let (start, end) = s
            .split_once('/')
            .ok_or_else(|| TimeParseError::InvalidFormat(s.to_string()))?;
        let range = Self::new(parse_iso8601(start.trim())?, parse_iso8601(end.trim())?);
        if range.start > range.end {
            return Err(TimeParseError::Inverted(s.to_string()));
        }
        Ok(range)
    }

    pub fn contains(&self, dt: &DateTime<Utc>) -> bool {
        dt >= &self.start && dt <= &self.end
    }
}

/// Parse an ISO 8601 timestamp, assuming UTC when no offset is given.
pub fn parse_iso8601(s: &str) -> Result<DateTime<Utc>, TimeParseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(ndt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    // Date only
    if let Ok(ndt) =
        NaiveDateTime::parse_from_str(&format!("{}T00:00:00", s), "%Y-%m-%dT%H:%M:%S")
    {
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(TimeParseError::InvalidFormat(s.to_string()))
}

#[derive(Debug, thiserror::Error)]
pub enum TimeParseError {
    #[error("Invalid time format: {0}")]
    InvalidFormat(String),

    #[error("Time range ends before it starts: {0}")]
    Inverted(String),
}
