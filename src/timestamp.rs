use anyhow::Result;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

/// Parses timestamps from the formats seen in usage logs.
pub struct TimestampParser;

impl TimestampParser {
    /// Parse a timestamp string into a DateTime<Utc>.
    /// Handles Z suffix, explicit offsets, and naive datetimes assumed UTC.
    pub fn parse(timestamp_str: &str) -> Result<DateTime<Utc>> {
        // Handle both Z suffix and timezone info
        let timestamp = if timestamp_str.ends_with('Z') {
            timestamp_str.replace('Z', "+00:00")
        } else {
            timestamp_str.to_string()
        };

        // Try parsing as ISO 8601
        if let Ok(dt) = DateTime::parse_from_rfc3339(&timestamp) {
            return Ok(dt.with_timezone(&Utc));
        }

        // Try parsing as naive datetime and assume UTC
        if let Ok(naive) = NaiveDateTime::parse_from_str(&timestamp, "%Y-%m-%dT%H:%M:%S%.f") {
            return Ok(DateTime::from_naive_utc_and_offset(naive, Utc));
        }
        if let Ok(naive) = NaiveDateTime::parse_from_str(&timestamp, "%Y-%m-%d %H:%M:%S%.f") {
            return Ok(DateTime::from_naive_utc_and_offset(naive, Utc));
        }

        anyhow::bail!("Failed to parse timestamp: {}", timestamp_str)
    }

    /// Parse numeric epoch seconds (integer or fractional).
    pub fn parse_epoch_seconds(seconds: f64) -> Result<DateTime<Utc>> {
        let secs = seconds.trunc() as i64;
        let nanos = (seconds.fract() * 1_000_000_000.0) as u32;
        DateTime::from_timestamp(secs, nanos)
            .ok_or_else(|| anyhow::anyhow!("Epoch timestamp out of range: {}", seconds))
    }

    /// Parse a date string for range filters. Accepts `YYYY-MM-DD`, `YYYYMMDD`,
    /// and full datetime forms; bare dates resolve to midnight UTC.
    pub fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
        for fmt in ["%Y-%m-%d", "%Y%m%d"] {
            if let Ok(date) = NaiveDate::parse_from_str(date_str, fmt) {
                return Ok(date.and_time(NaiveTime::MIN).and_utc());
            }
        }

        Self::parse(date_str)
    }
}
