//! Sync watermark: the lower creation-time bound for the next fetch.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use thiserror::Error;

/// Raised when stored watermark text is not an RFC 3339 timestamp
#[derive(Debug, Error)]
#[error("Invalid watermark '{text}': {source}")]
pub struct WatermarkParseError {
    text: String,
    #[source]
    source: chrono::ParseError,
}

/// 1980-01-01T00:00:00Z as seconds since the Unix epoch
const SENTINEL_EPOCH_SECONDS: i64 = 315_532_800;

/// Orders created at or after this instant have not been synced yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark(DateTime<Utc>);

impl Watermark {
    /// Value written when no watermark exists yet (1980-01-01T00:00:00.000Z)
    pub fn sentinel() -> Self {
        Self(DateTime::<Utc>::default() + Duration::seconds(SENTINEL_EPOCH_SECONDS))
    }

    pub fn new(at: DateTime<Utc>) -> Self {
        Self(at)
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.0
    }

    /// ISO-8601 text with millisecond precision and a `Z` suffix
    pub fn to_iso_string(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl From<DateTime<Utc>> for Watermark {
    fn from(at: DateTime<Utc>) -> Self {
        Self(at)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_iso_string())
    }
}

impl FromStr for Watermark {
    type Err = WatermarkParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let text = s.trim();
        DateTime::parse_from_rfc3339(text)
            .map(|dt| Self(dt.with_timezone(&Utc)))
            .map_err(|source| WatermarkParseError {
                text: text.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sentinel_text() {
        assert_eq!(
            Watermark::sentinel().to_iso_string(),
            "1980-01-01T00:00:00.000Z"
        );
    }

    #[test]
    fn test_parse_trims_and_normalizes_offset() {
        let wm: Watermark = " 2024-03-05T10:15:30.250+02:00\n".parse().unwrap();
        assert_eq!(wm.to_iso_string(), "2024-03-05T08:15:30.250Z");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = "yesterday".parse::<Watermark>().unwrap_err();
        assert!(err.to_string().contains("yesterday"));
    }

    #[test]
    fn test_millisecond_precision() {
        let at = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()
            + chrono::Duration::microseconds(678_901);
        assert_eq!(Watermark::new(at).to_string(), "2024-01-02T03:04:05.678Z");
    }
}
