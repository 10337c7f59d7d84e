//! Textual date/time layouts accepted in condition values and parameters.
//!
//! The layout is chosen by the shape of the input (length and separators)
//! rather than by trying every format, so `20240102` is a compact date and
//! never a number of seconds.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

const DATE_LAYOUTS: &[(usize, &str)] = &[
    (10, "%Y-%m-%d"),
    (10, "%Y/%m/%d"),
    (8, "%Y%m%d"),
];

const DATETIME_LAYOUTS: &[(usize, &str)] = &[
    (19, "%Y-%m-%d %H:%M:%S"),
    (19, "%Y-%m-%dT%H:%M:%S"),
    (19, "%Y/%m/%d %H:%M:%S"),
    (16, "%Y-%m-%d %H:%M"),
    (23, "%Y-%m-%d %H:%M:%S%.3f"),
    (23, "%Y-%m-%d %H:%M:%S %3f"),
    (23, "%Y-%m-%dT%H:%M:%S%.3f"),
    (14, "%Y%m%d%H%M%S"),
];

const TIME_LAYOUTS: &[(usize, &str)] = &[(8, "%H:%M:%S"), (5, "%H:%M"), (12, "%H:%M:%S%.3f")];

fn by_shape<'a>(raw: &str, layouts: &'a [(usize, &'a str)]) -> impl Iterator<Item = &'a str> {
    let len = raw.len();
    layouts
        .iter()
        .filter(move |(l, _)| *l == len)
        .map(|(_, fmt)| *fmt)
}

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    by_shape(raw, DATE_LAYOUTS)
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
        .or_else(|| parse_datetime(raw).map(|dt| dt.date()))
}

pub fn parse_time(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    by_shape(raw, TIME_LAYOUTS)
        .find_map(|fmt| NaiveTime::parse_from_str(raw, fmt).ok())
        .or_else(|| {
            by_shape(raw, DATETIME_LAYOUTS)
                .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
                .map(|dt| dt.time())
        })
}

/// Parse a timezone-naive timestamp. Offsets in RFC 3339 input are
/// normalized to UTC; date-only input reads as midnight.
pub fn parse_datetime(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    by_shape(raw, DATETIME_LAYOUTS)
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc()))
        .or_else(|| {
            by_shape(raw, DATE_LAYOUTS)
                .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

/// Like [`parse_datetime`], but naive input is taken to be UTC.
pub fn parse_datetime_utc(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| parse_datetime(raw).map(|dt| dt.and_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn date_layouts() {
        assert_eq!(parse_date("2024-03-05"), Some(ymd(2024, 3, 5)));
        assert_eq!(parse_date("2024/03/05"), Some(ymd(2024, 3, 5)));
        assert_eq!(parse_date("20240305"), Some(ymd(2024, 3, 5)));
        assert_eq!(parse_date("2024-03-05 10:11:12"), Some(ymd(2024, 3, 5)));
        assert_eq!(parse_date("05.03.2024"), None);
    }

    #[test]
    fn datetime_layouts() {
        let expected = ymd(2024, 3, 5).and_hms_opt(10, 11, 12).unwrap();
        assert_eq!(parse_datetime("2024-03-05 10:11:12"), Some(expected));
        assert_eq!(parse_datetime("2024-03-05T10:11:12"), Some(expected));
        assert_eq!(parse_datetime("20240305101112"), Some(expected));
        assert_eq!(parse_datetime("2024-03-05T12:11:12+02:00"), Some(expected));
        assert_eq!(
            parse_datetime("2024-03-05 10:11:12.345"),
            Some(ymd(2024, 3, 5).and_hms_milli_opt(10, 11, 12, 345).unwrap())
        );
        assert_eq!(
            parse_datetime("2024-03-05"),
            Some(ymd(2024, 3, 5).and_hms_opt(0, 0, 0).unwrap())
        );
    }

    #[test]
    fn time_layouts() {
        assert_eq!(parse_time("10:11"), NaiveTime::from_hms_opt(10, 11, 0));
        assert_eq!(parse_time("10:11:12"), NaiveTime::from_hms_opt(10, 11, 12));
        assert_eq!(parse_time("25:00"), None);
    }

    #[test]
    fn utc_from_naive_and_offset() {
        let a = parse_datetime_utc("2024-03-05 10:11:12").unwrap();
        let b = parse_datetime_utc("2024-03-05T11:11:12+01:00").unwrap();
        assert_eq!(a, b);
    }
}
