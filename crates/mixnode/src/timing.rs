// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Clock arithmetic: epoch-days, key validity dates, interval strings.
//!
//! The packet timestamp stores days since the Unix epoch as a little-endian
//! u16, so everything here works in whole days. Key ring dates are
//! `YYYY-MM-DD`.

use chrono::{NaiveDate, Utc};
use std::time::Duration;

const SECS_PER_DAY: i64 = 86_400;

/// Days since the Unix epoch, truncated to u16 (valid until 2149).
pub fn epoch_days() -> u16 {
    (Utc::now().timestamp() / SECS_PER_DAY) as u16
}

/// Days since the Unix epoch for a calendar date.
pub fn date_to_days(date: NaiveDate) -> u16 {
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("epoch date");
    (date - epoch).num_days() as u16
}

/// Parse a `YYYY-MM-DD` key ring date.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

/// True if the `Created` date lies in the future. A corrupt date counts
/// as prevalid so the key is never used.
pub fn date_prevalid(created: &str) -> bool {
    match parse_date(created) {
        Some(d) => d > Utc::now().date_naive(),
        None => true,
    }
}

/// True if the `Expires` date has passed. A corrupt date counts as
/// expired so the key is never used.
pub fn date_expired(expires: &str) -> bool {
    match parse_date(expires) {
        Some(d) => d < Utc::now().date_naive(),
        None => true,
    }
}

/// Parse an interval string with a single unit suffix: `30s`, `15m`,
/// `2h`, `1d`. A bare number is seconds.
pub fn parse_interval(s: &str) -> Option<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let (value, mult) = match s.as_bytes()[s.len() - 1] {
        b's' => (&s[..s.len() - 1], 1),
        b'm' => (&s[..s.len() - 1], 60),
        b'h' => (&s[..s.len() - 1], 3_600),
        b'd' => (&s[..s.len() - 1], 86_400),
        _ => (s, 1),
    };
    let value: u64 = value.parse().ok()?;
    Some(Duration::from_secs(value * mult))
}

/// Today plus `days`, as a `YYYY-MM-DD` string.
pub fn date_in_days(days: i64) -> String {
    (Utc::now().date_naive() + chrono::Duration::days(days))
        .format("%Y-%m-%d")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_days_is_current_era() {
        let days = epoch_days();
        // 2024-01-01 is epoch-day 19723; anything earlier means a broken clock.
        assert!(days > 19_723);
    }

    #[test]
    fn test_date_roundtrip() {
        let d = parse_date("2001-09-09").unwrap();
        assert_eq!(date_to_days(d), 11_574);
    }

    #[test]
    fn test_validity_checks() {
        assert!(date_expired("1999-01-01"));
        assert!(!date_prevalid("1999-01-01"));
        assert!(date_prevalid("2999-01-01"));
        assert!(!date_expired("2999-01-01"));
        // Corrupt dates fail closed in both directions.
        assert!(date_expired("not-a-date"));
        assert!(date_prevalid("not-a-date"));
    }

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_interval("15m"), Some(Duration::from_secs(900)));
        assert_eq!(parse_interval("2h"), Some(Duration::from_secs(7_200)));
        assert_eq!(parse_interval("1d"), Some(Duration::from_secs(86_400)));
        assert_eq!(parse_interval("45"), Some(Duration::from_secs(45)));
        assert_eq!(parse_interval("xyz"), None);
    }
}
