//! Date and date-time parsing into ISO 8601.
//!
//! Legacy exports carry dates in many layouts. Parsing tries a fixed list of
//! formats in order and always formats the result in ISO 8601 extended form.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};

const ISO_DATE: &str = "%Y-%m-%d";
const ISO_DATETIME: &str = "%Y-%m-%dT%H:%M:%S";

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m-%d-%Y",
    "%d-%b-%Y",
    "%d %b %Y",
    "%b %d, %Y",
    "%B %d, %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M %p",
    "%m/%d/%Y %I:%M:%S %p",
];

/// Parses a date-only value.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(trimmed, format).ok())
}

/// Parses a value carrying a time component. Offsets are normalized to UTC.
pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc());
    }
    DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
}

/// Parses either form, widening plain dates to midnight.
pub fn parse_any(value: &str) -> Option<NaiveDateTime> {
    parse_datetime(value).or_else(|| parse_date(value).map(|d| d.and_time(NaiveTime::MIN)))
}

pub fn format_iso8601_date(date: NaiveDate) -> String {
    date.format(ISO_DATE).to_string()
}

pub fn format_iso8601_datetime(dt: NaiveDateTime) -> String {
    dt.format(ISO_DATETIME).to_string()
}

/// Converts any supported date layout to `YYYY-MM-DD`.
///
/// Date-times are truncated to their date.
pub fn to_iso8601_date(value: &str) -> Option<String> {
    parse_date(value)
        .or_else(|| parse_datetime(value).map(|dt| dt.date()))
        .map(format_iso8601_date)
}

/// Converts any supported layout to `YYYY-MM-DDTHH:MM:SS`.
pub fn to_iso8601_datetime(value: &str) -> Option<String> {
    parse_any(value).map(format_iso8601_datetime)
}

pub fn is_iso8601_date(value: &str) -> bool {
    NaiveDate::parse_from_str(value, ISO_DATE)
        .map(|d| format_iso8601_date(d) == value)
        .unwrap_or(false)
}

pub fn is_iso8601_datetime(value: &str) -> bool {
    NaiveDateTime::parse_from_str(value, ISO_DATETIME)
        .map(|dt| format_iso8601_datetime(dt) == value)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn us_and_iso_dates_normalize() {
        assert_eq!(to_iso8601_date("03/07/1980").as_deref(), Some("1980-03-07"));
        assert_eq!(to_iso8601_date("1980-03-07").as_deref(), Some("1980-03-07"));
        assert_eq!(to_iso8601_date("07-Mar-1980").as_deref(), Some("1980-03-07"));
        assert_eq!(to_iso8601_date("March 7, 1980").as_deref(), Some("1980-03-07"));
    }

    #[test]
    fn invalid_dates_are_rejected() {
        assert!(parse_date("1980-13-01").is_none());
        assert!(parse_date("not a date").is_none());
        assert!(parse_date("").is_none());
    }

    #[test]
    fn datetimes_with_offsets_become_utc() {
        assert_eq!(
            to_iso8601_datetime("2024-01-01T10:00:00+02:00").as_deref(),
            Some("2024-01-01T08:00:00")
        );
        assert_eq!(
            to_iso8601_datetime("01/02/2024 3:04 PM").as_deref(),
            Some("2024-01-02T15:04:00")
        );
    }

    #[test]
    fn canonical_checks_are_exact() {
        assert!(is_iso8601_date("2024-02-29"));
        assert!(!is_iso8601_date("2024-2-29"));
        assert!(is_iso8601_datetime("2024-02-29T00:00:00"));
        assert!(!is_iso8601_datetime("2024-02-29 00:00:00"));
    }
}
