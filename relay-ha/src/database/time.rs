//! Timestamp helpers for the database layer.
//!
//! Timestamps are stored as `INTEGER` Unix epoch milliseconds (UTC).

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Current time as Unix epoch milliseconds (UTC).
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Epoch milliseconds for `now - age`, saturating at zero.
pub fn ms_ago(age: Duration) -> i64 {
    let age_ms = i64::try_from(age.as_millis()).unwrap_or(i64::MAX);
    now_ms().saturating_sub(age_ms).max(0)
}

/// Epoch milliseconds for `now - hours`.
#[inline]
pub fn hours_ago_ms(hours: u64) -> i64 {
    ms_ago(Duration::from_secs(hours.saturating_mul(3600)))
}

/// Epoch milliseconds for `now - days`.
#[inline]
pub fn days_ago_ms(days: u64) -> i64 {
    hours_ago_ms(days.saturating_mul(24))
}

/// Convert Unix epoch milliseconds to `DateTime<Utc>`, falling back to the
/// epoch for values chrono cannot represent.
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .earliest()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Render epoch milliseconds as RFC 3339.
pub fn ms_to_rfc3339(ms: i64) -> String {
    ms_to_datetime(ms).to_rfc3339()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ms_ago_is_in_the_past() {
        let now = now_ms();
        let past = ms_ago(Duration::from_secs(60));
        assert!(past <= now - 60_000);
        assert!(past > now - 120_000);
    }

    #[test]
    fn test_days_ago() {
        let diff = now_ms() - days_ago_ms(7);
        assert!(diff >= 7 * 24 * 3600 * 1000);
    }

    #[test]
    fn test_ms_to_datetime_roundtrip() {
        let dt = ms_to_datetime(1_700_000_000_000);
        assert_eq!(dt.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(ms_to_datetime(i64::MAX), DateTime::<Utc>::UNIX_EPOCH);
    }
}
