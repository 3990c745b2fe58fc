//! Time parsing utilities for scheduler output and wall-time requests.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DurationError {
    #[error("Malformed duration '{0}', expected [[D-]H:]M:S")]
    Malformed(String),
    #[error("Duration field out of range in '{0}'")]
    OutOfRange(String),
    #[error("Duration must be positive")]
    Zero,
}

/// Parse a SLURM timestamp (YYYY-MM-DDTHH:MM:SS or placeholder values).
///
/// Returns None for empty strings or placeholder values like "N/A", "Unknown", "None".
pub fn parse_slurm_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() || s == "N/A" || s == "Unknown" || s == "None" {
        return None;
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .and_then(|dt| Utc.from_local_datetime(&dt).single())
}

/// Split `[[D-]H:]M:S` into (days, hours, minutes, seconds).
fn split_components(s: &str) -> Option<(u64, u64, u64, u64)> {
    let (days, time_part) = match s.split_once('-') {
        Some((d, rest)) => (Some(d.parse::<u64>().ok()?), rest),
        None => (None, s),
    };

    let time_parts = time_part
        .split(':')
        .map(|p| p.parse::<u64>().ok())
        .collect::<Option<Vec<u64>>>()?;

    match (days, time_parts.as_slice()) {
        (Some(d), [h, m, sec]) => Some((d, *h, *m, *sec)),
        (None, [h, m, sec]) => Some((0, *h, *m, *sec)),
        (None, [m, sec]) => Some((0, 0, *m, *sec)),
        _ => None,
    }
}

/// Sum the fields, or None if the total does not fit in a u64.
fn total_seconds(days: u64, hours: u64, minutes: u64, seconds: u64) -> Option<u64> {
    days.checked_mul(86400)?
        .checked_add(hours.checked_mul(3600)?)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)
}

/// Parse a duration reported by the scheduler.
///
/// Supports `D-HH:MM:SS`, `HH:MM:SS` and `MM:SS`. Fields are not bounds
/// checked: the scheduler is trusted and out-of-range fields are summed.
///
/// Returns None for "UNLIMITED", "INVALID", "NOT_SET" or empty strings.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty()
        || s == "-"
        || s == "N/A"
        || s.eq_ignore_ascii_case("UNLIMITED")
        || s.eq_ignore_ascii_case("INVALID")
        || s.eq_ignore_ascii_case("NOT_SET")
    {
        return None;
    }

    let (d, h, m, sec) = split_components(s)?;
    total_seconds(d, h, m, sec).map(Duration::from_secs)
}

/// Parse a user-requested wall time.
///
/// Stricter than [`parse_duration`]: minutes and seconds must be below 60,
/// hours below 24 when a day count is given, and the total must be positive.
pub fn parse_walltime(s: &str) -> Result<Duration, DurationError> {
    let s = s.trim();
    let (d, h, m, sec) =
        split_components(s).ok_or_else(|| DurationError::Malformed(s.to_string()))?;

    if m >= 60 || sec >= 60 || (s.contains('-') && h >= 24) {
        return Err(DurationError::OutOfRange(s.to_string()));
    }

    let total =
        total_seconds(d, h, m, sec).ok_or_else(|| DurationError::OutOfRange(s.to_string()))?;
    if total == 0 {
        return Err(DurationError::Zero);
    }
    Ok(Duration::from_secs(total))
}

/// Format a duration as SLURM time (D-HH:MM:SS, or HH:MM:SS below one day).
///
/// Sub-second precision is dropped.
pub fn format_duration_slurm(duration: Duration) -> String {
    let seconds = duration.as_secs();
    let days = seconds / 86400;
    let hours = (seconds % 86400) / 3600;
    let mins = (seconds % 3600) / 60;
    let secs = seconds % 60;

    if days > 0 {
        format!("{}-{:02}:{:02}:{:02}", days, hours, mins, secs)
    } else {
        format!("{:02}:{:02}:{:02}", hours, mins, secs)
    }
}

/// Percentage of `limit` consumed by `elapsed`, rounded to the nearest
/// integer and clamped to 100.
///
/// Returns None when the limit is zero.
pub fn progress_percent(elapsed: Duration, limit: Duration) -> Option<u8> {
    let limit = limit.as_secs();
    if limit == 0 {
        return None;
    }
    let elapsed = elapsed.as_secs().min(limit);
    let percent = (elapsed * 100 + limit / 2) / limit;
    Some(percent.min(100) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_slurm_timestamp() {
        let dt = parse_slurm_timestamp("2024-01-15T10:30:00").unwrap();
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2024-01-15");

        assert!(parse_slurm_timestamp("N/A").is_none());
        assert!(parse_slurm_timestamp("Unknown").is_none());
        assert!(parse_slurm_timestamp("None").is_none());
        assert!(parse_slurm_timestamp("").is_none());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("1:00:00"), Some(Duration::from_secs(3600)));
        assert_eq!(
            parse_duration("1-00:00:00"),
            Some(Duration::from_secs(86400))
        );
        assert_eq!(parse_duration("30:00"), Some(Duration::from_secs(1800)));
        assert_eq!(parse_duration("0:05"), Some(Duration::from_secs(5)));
        assert!(parse_duration("UNLIMITED").is_none());
        assert!(parse_duration("INVALID").is_none());
        assert!(parse_duration("-").is_none());
        assert!(parse_duration("").is_none());
        assert!(parse_duration("1-30:00").is_none());
    }

    #[test]
    fn test_parse_duration_does_not_bound_check() {
        assert_eq!(parse_duration("90:00"), Some(Duration::from_secs(5400)));
    }

    #[test]
    fn test_huge_fields_do_not_overflow() {
        assert!(matches!(
            parse_walltime("9999999999999999999:00:00"),
            Err(DurationError::OutOfRange(_))
        ));
        assert!(matches!(
            parse_walltime("999999999999999-00:00:00"),
            Err(DurationError::OutOfRange(_))
        ));
        assert_eq!(parse_duration("9999999999999999999:00:00"), None);
        assert_eq!(parse_duration("18446744073709551615:59"), None);
    }

    #[test]
    fn test_parse_walltime() {
        assert_eq!(parse_walltime("00:30:00"), Ok(Duration::from_secs(1800)));
        assert_eq!(
            parse_walltime("2-01:00:00"),
            Ok(Duration::from_secs(2 * 86400 + 3600))
        );
        assert_eq!(parse_walltime("00:00:00"), Err(DurationError::Zero));
        assert!(matches!(
            parse_walltime("00:61:00"),
            Err(DurationError::OutOfRange(_))
        ));
        assert!(matches!(
            parse_walltime("1-25:00:00"),
            Err(DurationError::OutOfRange(_))
        ));
        assert!(matches!(
            parse_walltime("half an hour"),
            Err(DurationError::Malformed(_))
        ));
    }

    #[test]
    fn test_format_duration_slurm() {
        assert_eq!(format_duration_slurm(Duration::from_secs(3600)), "01:00:00");
        assert_eq!(
            format_duration_slurm(Duration::from_secs(90061)),
            "1-01:01:01"
        );
        assert_eq!(format_duration_slurm(Duration::ZERO), "00:00:00");
    }

    #[test]
    fn test_duration_round_trip() {
        for secs in [0, 1, 59, 60, 3599, 3600, 86399, 86400, 90061, 10 * 86400 + 7] {
            let d = Duration::from_secs(secs);
            assert_eq!(parse_duration(&format_duration_slurm(d)), Some(d));
        }
    }

    #[test]
    fn test_progress_percent() {
        let limit = Duration::from_secs(1800);
        assert_eq!(progress_percent(Duration::ZERO, limit), Some(0));
        assert_eq!(progress_percent(Duration::from_secs(9), limit), Some(1));
        assert_eq!(progress_percent(Duration::from_secs(900), limit), Some(50));
        assert_eq!(progress_percent(Duration::from_secs(5000), limit), Some(100));
        assert_eq!(progress_percent(Duration::from_secs(5), Duration::ZERO), None);
    }

    #[test]
    fn test_progress_is_monotonic_and_bounded() {
        let limit = Duration::from_secs(601);
        let mut last = 0;
        for secs in 0..700 {
            let p = progress_percent(Duration::from_secs(secs), limit).unwrap();
            assert!(p <= 100);
            assert!(p >= last);
            last = p;
        }
    }
}
