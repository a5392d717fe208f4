//! Duration grammar for export terms: `Nd` (days), `Nw` (weeks),
//! `YYYY-MM-DD` (delta to that date), or a standard duration string (`"72h"`,
//! `"15m"`).

use chrono::NaiveDate;

use crate::error::{CryptoError, CryptoResult};

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDuration {
    /// May be negative — a past target date yields a negative duration.
    pub seconds: i64,
    /// Set only for the `YYYY-MM-DD` form when the parsed date is in the past.
    pub warning: Option<String>,
}

pub fn parse_export_term(input: &str, now_unix: i64) -> CryptoResult<ParsedDuration> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CryptoError::InvalidDuration("empty duration expression".into()));
    }

    if let Some(days) = parse_suffixed_integer(trimmed, 'd') {
        return Ok(ParsedDuration {
            seconds: days * 86_400,
            warning: None,
        });
    }
    if let Some(weeks) = parse_suffixed_integer(trimmed, 'w') {
        return Ok(ParsedDuration {
            seconds: weeks * 7 * 86_400,
            warning: None,
        });
    }
    if is_iso_date(trimmed) {
        return parse_iso_date(trimmed, now_unix);
    }

    let std_dur = humantime::parse_duration(trimmed)
        .map_err(|e| CryptoError::InvalidDuration(format!("{trimmed}: {e}")))?;
    Ok(ParsedDuration {
        seconds: std_dur.as_secs() as i64,
        warning: None,
    })
}

fn parse_suffixed_integer(s: &str, suffix: char) -> Option<i64> {
    let digits = s.strip_suffix(suffix)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

fn is_iso_date(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 10
        && bytes[4] == b'-'
        && bytes[7] == b'-'
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| if i == 4 || i == 7 { true } else { b.is_ascii_digit() })
}

fn parse_iso_date(s: &str, now_unix: i64) -> CryptoResult<ParsedDuration> {
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|e| CryptoError::InvalidDuration(format!("{s}: {e}")))?;
    let target_midnight_utc = date
        .and_hms_opt(0, 0, 0)
        .expect("midnight is always a valid time")
        .and_utc()
        .timestamp();
    let seconds = target_midnight_utc - now_unix;
    let warning = (seconds < 0)
        .then(|| format!("export term \"{s}\" is in the past; applying a negative duration"));
    Ok(ParsedDuration { seconds, warning })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_days_suffix() {
        let d = parse_export_term("3d", 0).unwrap();
        assert_eq!(d.seconds, 72 * 3600);
        assert!(d.warning.is_none());
    }

    #[test]
    fn parses_weeks_suffix() {
        let d = parse_export_term("2w", 0).unwrap();
        assert_eq!(d.seconds, 336 * 3600);
    }

    #[test]
    fn iso_date_past_is_defined_and_negative() {
        // 2000-01-01T00:00:00Z epoch seconds.
        let now = 1_700_000_000;
        let d = parse_export_term("2000-01-01", now).unwrap();
        assert!(d.seconds < 0);
        assert!(d.warning.is_some());
    }

    #[test]
    fn iso_date_future_has_no_warning() {
        let now = 0;
        let d = parse_export_term("2030-01-01", now).unwrap();
        assert!(d.seconds > 0);
        assert!(d.warning.is_none());
    }

    #[test]
    fn standard_duration_fallback() {
        let d = parse_export_term("15m", 0).unwrap();
        assert_eq!(d.seconds, 15 * 60);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_export_term("not-a-duration", 0).is_err());
    }

    proptest::proptest! {
        /// P3: `Nd` and `Nw` always resolve to exactly `N` days/weeks of seconds,
        /// independent of `now` (both are `now`-relative additions, not absolute).
        #[test]
        fn p3_days_and_weeks_scale_linearly(n in 0i64..10_000, now in 0i64..4_000_000_000) {
            let days = parse_export_term(&format!("{n}d"), now).unwrap();
            proptest::prop_assert_eq!(days.seconds, n * 86_400);
            let weeks = parse_export_term(&format!("{n}w"), now).unwrap();
            proptest::prop_assert_eq!(weeks.seconds, n * 7 * 86_400);
        }
    }
}
