//! Timestamps as vendors send them, and first-fetch time expressions.

use crate::error::TimeParseError;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A record or watermark time, normalized to UTC.
///
/// Vendors send either integer epoch seconds or ISO-8601 strings; both
/// normalize here so the filter can compare them directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Creates a timestamp from epoch seconds.
    pub fn from_epoch_secs(secs: i64) -> Option<Self> {
        DateTime::from_timestamp(secs, 0).map(Self)
    }

    /// Creates a timestamp from epoch milliseconds.
    pub fn from_epoch_millis(millis: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(Self)
    }

    /// The current time.
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Seconds since the Unix epoch.
    pub fn epoch_secs(&self) -> i64 {
        self.0.timestamp()
    }

    /// The first whole second after this time.
    pub fn next_second(&self) -> Option<Self> {
        self.epoch_secs().checked_add(1).and_then(Self::from_epoch_secs)
    }

    /// The underlying UTC datetime.
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Formats as `YYYY-MM-DDTHH:MM:SSZ`, the canonical `_time` representation.
    pub fn to_datestring(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Secs, true)
    }

    /// Parses a timestamp string.
    ///
    /// Accepts RFC 3339, naive ISO datetimes (read as UTC), bare dates and
    /// numeric epoch seconds.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        if let Ok(secs) = s.parse::<i64>() {
            return Self::from_epoch_secs(secs);
        }
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(Self(dt.with_timezone(&Utc)));
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return Some(Self(naive.and_utc()));
            }
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| Self(naive.and_utc()))
    }

    /// Reads a timestamp from a JSON value: a number of epoch seconds or a string.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Number(n) => {
                if let Some(secs) = n.as_i64() {
                    Self::from_epoch_secs(secs)
                } else {
                    n.as_f64()
                        .and_then(|f| Self::from_epoch_millis((f * 1000.0).round() as i64))
                }
            }
            serde_json::Value::String(s) => Self::parse(s),
            _ => None,
        }
    }

    /// Returns this timestamp shifted by `seconds`.
    pub fn plus_secs(&self, seconds: i64) -> Self {
        Self(self.0 + Duration::seconds(seconds))
    }
}

impl From<DateTime<Utc>> for Timestamp {
    fn from(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_datestring())
    }
}

/// Resolves a first-fetch expression relative to `now`.
///
/// Understands absolute timestamps (see [`Timestamp::parse`]) and relative
/// lookbacks such as `3 days`, `12 hours ago` or `1 week`.
pub fn parse_first_fetch(expr: &str, now: DateTime<Utc>) -> Result<Timestamp, TimeParseError> {
    if let Some(ts) = Timestamp::parse(expr) {
        return Ok(ts);
    }

    let err = || TimeParseError(expr.to_string());
    let mut parts = expr.split_whitespace();
    let amount: i64 = parts.next().and_then(|n| n.parse().ok()).ok_or_else(err)?;
    let unit = parts.next().ok_or_else(err)?.to_ascii_lowercase();
    match parts.next() {
        None => {}
        Some(word) if word.eq_ignore_ascii_case("ago") => {}
        Some(_) => return Err(err()),
    }

    let lookback = match unit.trim_end_matches('s') {
        "second" | "sec" => Duration::seconds(amount),
        "minute" | "min" => Duration::minutes(amount),
        "hour" => Duration::hours(amount),
        "day" => Duration::days(amount),
        "week" => Duration::weeks(amount),
        "month" => Duration::days(amount * 30),
        "year" => Duration::days(amount * 365),
        _ => return Err(err()),
    };

    Ok(Timestamp(now - lookback))
}
