//! The `<value>,<timestamp>` node-annotation codec.
//!
//! Load signals travel through node annotations stamped with a local-time
//! timestamp. An annotation is usable only while the stamp is inside its
//! active period; stale values are treated as "no signal".

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use thiserror::Error;

/// Timestamp layout appended to every annotation value.
pub const TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Fallback when `TZ` is unset or unparseable.
pub const DEFAULT_TIME_ZONE: Tz = chrono_tz::Asia::Shanghai;

/// Grace window added to a metric's sync period when judging freshness.
pub const EXTRA_ACTIVE_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Fixed activity window for the hot-value annotation.
pub const HOT_VALUE_ACTIVE_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Annotation key carrying the scheduling-pressure signal.
pub const HOT_VALUE_KEY: &str = "node_hot_value";

/// Anything shorter cannot be a real timestamp.
const MIN_TIMESTAMP_LEN: usize = 5;

#[derive(Debug, Error)]
pub enum AnnotationError {
    #[error("malformed annotation value: {0:?}")]
    Malformed(String),
    #[error("illegal timestamp: {0:?}")]
    Timestamp(String),
    #[error("annotation timestamp {0:?} is expired")]
    Expired(String),
    #[error("negative usage value: {0}")]
    Negative(f64),
}

/// Timezone used for annotation stamps: `TZ` env var, else Shanghai.
pub fn local_timezone() -> Tz {
    match std::env::var("TZ") {
        Ok(zone) => zone.parse().unwrap_or(DEFAULT_TIME_ZONE),
        Err(_) => DEFAULT_TIME_ZONE,
    }
}

/// Render `now` in the given zone using the annotation layout.
pub fn format_local(now: DateTime<Utc>, tz: Tz) -> String {
    now.with_timezone(&tz).format(TIME_FORMAT).to_string()
}

/// Append a local-time stamp to a value: `"0.32"` → `"0.32,2024-..."`.
pub fn stamp(value: &str, now: DateTime<Utc>, tz: Tz) -> String {
    format!("{},{}", value, format_local(now, tz))
}

/// Split a stamped annotation into (value, timestamp).
pub fn split_stamped(raw: &str) -> Result<(&str, &str), AnnotationError> {
    match raw.split_once(',') {
        Some((value, ts)) if !ts.contains(',') => Ok((value, ts)),
        _ => Err(AnnotationError::Malformed(raw.to_string())),
    }
}

/// Parse a local-zone timestamp back to UTC.
pub fn parse_local_timestamp(ts: &str, tz: Tz) -> Result<DateTime<Utc>, AnnotationError> {
    if ts.len() < MIN_TIMESTAMP_LEN {
        return Err(AnnotationError::Timestamp(ts.to_string()));
    }
    let naive = NaiveDateTime::parse_from_str(ts, TIME_FORMAT)
        .map_err(|_| AnnotationError::Timestamp(ts.to_string()))?;
    naive
        .and_local_timezone(tz)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| AnnotationError::Timestamp(ts.to_string()))
}

/// Whether a stamp is still inside its active period at `now`.
pub fn in_active_period(
    ts: &str,
    active: Duration,
    now: DateTime<Utc>,
    tz: Tz,
) -> bool {
    match parse_local_timestamp(ts, tz) {
        Ok(written) => {
            let active =
                chrono::Duration::from_std(active).unwrap_or_else(|_| chrono::Duration::zero());
            now < written + active
        }
        Err(_) => false,
    }
}

/// Decode a stamped usage value, enforcing freshness and non-negativity.
pub fn parse_stamped_usage(
    raw: &str,
    active: Duration,
    now: DateTime<Utc>,
    tz: Tz,
) -> Result<f64, AnnotationError> {
    let (value, ts) = split_stamped(raw)?;
    if !in_active_period(ts, active, now, tz) {
        return Err(AnnotationError::Expired(raw.to_string()));
    }
    let usage: f64 = value
        .parse()
        .map_err(|_| AnnotationError::Malformed(raw.to_string()))?;
    if usage < 0.0 {
        return Err(AnnotationError::Negative(usage));
    }
    Ok(usage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TZ: Tz = chrono_tz::Asia::Shanghai;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn stamp_and_split_round_trip() {
        let now = at(2024, 3, 1, 12, 0, 0);
        let stamped = stamp("0.32145", now, TZ);
        let (value, ts) = split_stamped(&stamped).unwrap();
        assert_eq!(value, "0.32145");
        assert_eq!(parse_local_timestamp(ts, TZ).unwrap(), now);
    }

    #[test]
    fn fresh_annotation_is_active() {
        let written = at(2024, 3, 1, 12, 0, 0);
        let stamped = stamp("0.5", written, TZ);
        let (_, ts) = split_stamped(&stamped).unwrap();

        let just_after = written + chrono::Duration::seconds(30);
        assert!(in_active_period(ts, Duration::from_secs(60), just_after, TZ));
    }

    #[test]
    fn stale_annotation_is_inactive() {
        let written = at(2024, 3, 1, 12, 0, 0);
        let stamped = stamp("0.5", written, TZ);
        let (_, ts) = split_stamped(&stamped).unwrap();

        let ten_minutes_on = written + chrono::Duration::minutes(10);
        assert!(!in_active_period(ts, Duration::from_secs(60), ten_minutes_on, TZ));
    }

    #[test]
    fn usage_round_trips_at_five_decimals() {
        let now = at(2024, 3, 1, 12, 0, 0);
        let stamped = stamp(&format!("{:.5}", 0.12345), now, TZ);
        let usage = parse_stamped_usage(&stamped, Duration::from_secs(60), now, TZ).unwrap();
        assert!((usage - 0.12345).abs() < 1e-9);
    }

    #[test]
    fn rejects_malformed_values() {
        let now = at(2024, 3, 1, 12, 0, 0);
        assert!(matches!(
            parse_stamped_usage("no-comma-here", Duration::from_secs(60), now, TZ),
            Err(AnnotationError::Malformed(_))
        ));
        assert!(matches!(
            parse_stamped_usage("0.5,abc", Duration::from_secs(60), now, TZ),
            Err(AnnotationError::Expired(_) | AnnotationError::Timestamp(_))
        ));
    }

    #[test]
    fn rejects_negative_usage() {
        let now = at(2024, 3, 1, 12, 0, 0);
        let stamped = stamp("-0.1", now, TZ);
        assert!(matches!(
            parse_stamped_usage(&stamped, Duration::from_secs(60), now, TZ),
            Err(AnnotationError::Negative(_))
        ));
    }

    #[test]
    fn short_timestamp_is_rejected() {
        assert!(parse_local_timestamp("abc", TZ).is_err());
    }
}
