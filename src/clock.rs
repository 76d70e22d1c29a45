//! Wall-clock helpers. All instants are UTC unix milliseconds.

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};

use crate::model::Ms;

pub const DAY_MS: Ms = 24 * 3_600_000;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
];

pub fn now_ms() -> Ms {
    Utc::now().timestamp_millis()
}

/// Parse an RFC 3339 timestamp, or a naive wall-clock one taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<Ms> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc().timestamp_millis())
}

pub fn format_timestamp(ms: Ms) -> String {
    match DateTime::<Utc>::from_timestamp_millis(ms) {
        Some(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
        None => ms.to_string(),
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// Midnight UTC at the start of `date`.
pub fn day_start_ms(date: NaiveDate) -> Ms {
    date.and_time(chrono::NaiveTime::MIN)
        .and_utc()
        .timestamp_millis()
}

/// Milliseconds since midnight of the instant's own calendar day.
pub fn time_of_day_ms(ms: Ms) -> Ms {
    ms.rem_euclid(DAY_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JAN_10_2024: Ms = 1_704_844_800_000;
    const H: Ms = 3_600_000;

    #[test]
    fn parses_naive_minutes() {
        assert_eq!(parse_timestamp("2024-01-10T09:00"), Some(JAN_10_2024 + 9 * H));
    }

    #[test]
    fn parses_naive_seconds_and_space_separator() {
        assert_eq!(parse_timestamp("2024-01-10T09:00:30"), Some(JAN_10_2024 + 9 * H + 30_000));
        assert_eq!(parse_timestamp("2024-01-10 09:00:00"), Some(JAN_10_2024 + 9 * H));
    }

    #[test]
    fn parses_rfc3339_with_offset() {
        assert_eq!(parse_timestamp("2024-01-10T09:00:00Z"), Some(JAN_10_2024 + 9 * H));
        assert_eq!(
            parse_timestamp("2024-01-10T11:00:00+02:00"),
            Some(JAN_10_2024 + 9 * H)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_timestamp(""), None);
        assert_eq!(parse_timestamp("tomorrow"), None);
        assert_eq!(parse_timestamp("2024-13-40T09:00"), None);
    }

    #[test]
    fn formats_as_utc_seconds() {
        assert_eq!(format_timestamp(JAN_10_2024 + 9 * H), "2024-01-10T09:00:00Z");
    }

    #[test]
    fn date_helpers() {
        let date = parse_date("2024-01-10").unwrap();
        assert_eq!(day_start_ms(date), JAN_10_2024);
        assert!(parse_date("10/01/2024").is_none());
        assert_eq!(time_of_day_ms(JAN_10_2024 + 23 * H), 23 * H);
        assert_eq!(time_of_day_ms(-H), 23 * H);
    }
}
